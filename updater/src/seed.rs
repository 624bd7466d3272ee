//! Monthly map seed rotation and launch script editing
//!
//! Once a month, on the first chosen weekday, the server gets a fresh world:
//! `+server.seed` and `+server.salt` on the executable's line of the launch
//! script are replaced with new random values before the server restarts.

use crate::error::ProcessError;
use chrono::{Datelike, NaiveDate, Weekday};
use log::{debug, warn};
use rand::Rng;
use std::fmt;
use std::path::Path;

/// Exclusive upper bound of generated seeds and salts
pub const MAX_SEED: u32 = 2_147_483_647;

pub const SEED_PARAMETER: &str = "+server.seed";
pub const SALT_PARAMETER: &str = "+server.salt";
pub const HOSTNAME_PARAMETER: &str = "+server.hostname";

/// True on the first `weekday` of `date`'s month
pub fn is_first_weekday_of_month(date: NaiveDate, weekday: Weekday) -> bool {
    date.weekday() == weekday && date.day() <= 7
}

/// Whether a rotation should happen today given the last rotation date
pub fn rotation_due(today: NaiveDate, weekday: Weekday, last: Option<NaiveDate>) -> bool {
    is_first_weekday_of_month(today, weekday) && last != Some(today)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPair {
    pub seed: u32,
    pub salt: u32,
}

impl SeedPair {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            seed: rng.gen_range(0..MAX_SEED),
            salt: rng.gen_range(0..MAX_SEED),
        }
    }
}

impl fmt::Display for SeedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seed {} and salt {}", self.seed, self.salt)
    }
}

/// Byte offset just past `key` where it stands as a whole token
fn find_parameter(line: &str, key: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = line[from..].find(key) {
        let start = from + offset;
        let end = start + key.len();
        let before = line[..start].chars().next_back();
        let after = line[end..].chars().next();
        if before.map_or(true, char::is_whitespace) && after.map_or(true, char::is_whitespace) {
            return Some(end);
        }
        from = end;
    }
    None
}

/// Sets `key <value>` on a command line, appending it when absent
pub fn replace_parameter(line: &str, key: &str, value: &str) -> String {
    let Some(key_end) = find_parameter(line, key) else {
        return format!("{} {} {}", line.trim_end(), key, value);
    };

    let rest = &line[key_end..];
    let value_start = key_end + (rest.len() - rest.trim_start().len());
    let tail = &line[value_start..];

    if tail.is_empty() || tail.starts_with('+') {
        let tail = if tail.is_empty() {
            String::new()
        } else {
            format!(" {}", tail)
        };
        return format!("{} {}{}", &line[..key_end], value, tail);
    }

    let value_len = tail.find(char::is_whitespace).unwrap_or(tail.len());
    format!(
        "{}{}{}",
        &line[..value_start],
        value,
        &line[value_start + value_len..]
    )
}

/// Words that may run the executable on their line instead of naming it first
const COMMAND_WRAPPERS: [&str; 4] = ["exec", "nohup", "call", "start"];

/// File name of the program a script line runs, skipping wrappers and the
/// empty window title `start ""` takes
fn command_name(line: &str) -> Option<&str> {
    let mut rest = line.trim_start();
    loop {
        let (token, tail) = match rest.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"').unwrap_or(quoted.len());
                (&quoted[..end], quoted.get(end + 1..).unwrap_or(""))
            }
            None => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            }
        };

        if token.is_empty() && tail.is_empty() {
            return None;
        }
        if token.is_empty() || COMMAND_WRAPPERS.iter().any(|w| token.eq_ignore_ascii_case(w)) {
            rest = tail.trim_start();
            continue;
        }
        return token.rsplit(['/', '\\']).next();
    }
}

/// Rewrites seed and salt on the first line whose command is `executable`
///
/// Line endings are kept as they were. Returns `None` when no line runs the
/// executable.
pub fn rewrite_launch_script(contents: &str, executable: &str, seeds: SeedPair) -> Option<String> {
    let needle = executable.to_lowercase();
    let mut rewritten = String::with_capacity(contents.len() + 64);
    let mut replaced = false;

    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];

        let runs_executable = command_name(body)
            .is_some_and(|name| name.to_lowercase().starts_with(&needle));
        if !replaced && !needle.is_empty() && runs_executable {
            let body = replace_parameter(body, SEED_PARAMETER, &seeds.seed.to_string());
            let body = replace_parameter(&body, SALT_PARAMETER, &seeds.salt.to_string());
            rewritten.push_str(&body);
            replaced = true;
        } else {
            rewritten.push_str(body);
        }
        rewritten.push_str(ending);
    }

    replaced.then_some(rewritten)
}

/// Server name given with `+server.hostname`, quoted or bare
pub fn parse_hostname(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let key_end = find_parameter(line, HOSTNAME_PARAMETER)?;
        let value = line[key_end..].trim_start();
        let name = match value.strip_prefix('"') {
            Some(quoted) => quoted.split('"').next().unwrap_or(quoted),
            None => value.split_whitespace().next().unwrap_or(""),
        };
        (!name.is_empty()).then(|| name.to_string())
    })
}

pub async fn read_hostname(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_hostname(&contents),
        Err(e) => {
            debug!("Cannot read hostname from {}: {}", path.display(), e);
            None
        }
    }
}

/// Applies new seeds to the launch script on disk
///
/// Returns false when the script has no line for `executable`.
pub async fn rewrite_launch_file(
    path: &Path,
    executable: &str,
    seeds: SeedPair,
) -> Result<bool, ProcessError> {
    let script_error = |source: std::io::Error| ProcessError::Script {
        path: path.to_path_buf(),
        source,
    };

    let contents = tokio::fs::read_to_string(path).await.map_err(script_error)?;
    let Some(rewritten) = rewrite_launch_script(&contents, executable, seeds) else {
        warn!(
            "{} never runs {}, seed left unchanged",
            path.display(),
            executable
        );
        return Ok(false);
    };

    tokio::fs::write(path, rewritten).await.map_err(script_error)?;
    Ok(true)
}
