//! Finding, killing and relaunching the game server process
//!
//! The process table comes from the platform's own listing tool (`ps` on
//! Unix, `wmic` on Windows) and is parsed into `ProcessRecord`s. A process
//! counts as ours when its command line contains the launch script name or the
//! server executable name. Failures here are logged and read as "not running"
//! or "restart had no effect" by `ProcessManager`; they never stop the loop.

use crate::config::Config;
use crate::error::ProcessError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// One row of the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command_line: String,
}

/// Parses `ps -eo pid=,args=` output
pub fn parse_ps_output(text: &str) -> Vec<ProcessRecord> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, rest) = match line.split_once(char::is_whitespace) {
                Some((pid, rest)) => (pid, rest.trim()),
                None => (line, ""),
            };
            let pid = pid.parse().ok()?;
            Some(ProcessRecord {
                pid,
                command_line: rest.to_string(),
            })
        })
        .collect()
}

/// Parses `wmic process get CommandLine,ProcessId /format:csv` output
///
/// Rows look like `NODE,<command line>,<pid>`. The command line may itself
/// contain commas, so the node is split off the front and the pid off the back.
pub fn parse_wmic_csv(text: &str) -> Vec<ProcessRecord> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (_node, rest) = line.split_once(',')?;
            let (command_line, pid) = rest.rsplit_once(',')?;
            let pid = pid.trim().parse().ok()?;
            Some(ProcessRecord {
                pid,
                command_line: command_line.trim().to_string(),
            })
        })
        .collect()
}

/// Case-insensitive command-line filter that ignores given pids
#[derive(Debug, Clone)]
pub struct ProcessMatcher {
    needle: String,
    excluded: Vec<u32>,
}

impl ProcessMatcher {
    pub fn new(target: &str) -> Self {
        Self {
            needle: target.to_lowercase(),
            excluded: vec![std::process::id()],
        }
    }

    pub fn excluding(mut self, pid: u32) -> Self {
        self.excluded.push(pid);
        self
    }

    pub fn matches(&self, record: &ProcessRecord) -> bool {
        !self.needle.is_empty()
            && !self.excluded.contains(&record.pid)
            && record.command_line.to_lowercase().contains(&self.needle)
    }

    pub fn select(&self, records: &[ProcessRecord]) -> Vec<u32> {
        records
            .iter()
            .filter(|record| self.matches(record))
            .map(|record| record.pid)
            .collect()
    }
}

/// OS-level operations on the server process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Whether any process's command line contains `target`
    async fn is_running(&self, target: &str) -> Result<bool, ProcessError>;

    /// Force kills every process tree whose command line contains `target`
    async fn terminate(&self, target: &str) -> Result<(), ProcessError>;

    /// Starts `script` detached with `working_dir` as its current directory
    async fn launch(&self, script: &Path, working_dir: &Path) -> Result<(), ProcessError>;
}

/// `ProcessControl` backed by the real process table
#[derive(Debug, Default, Clone)]
pub struct SystemProcesses;

impl SystemProcesses {
    pub fn new() -> Self {
        Self
    }

    /// Lists processes, returning the listing tool's own pid alongside
    async fn list(&self) -> Result<(Vec<ProcessRecord>, Option<u32>), ProcessError> {
        let (program, args): (&str, &[&str]) = if cfg!(windows) {
            (
                "wmic",
                &["process", "get", "CommandLine,ProcessId", "/format:csv"],
            )
        } else {
            ("ps", &["-eo", "pid=,args="])
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let helper_pid = child.id();

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProcessError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let records = if cfg!(windows) {
            parse_wmic_csv(&text)
        } else {
            parse_ps_output(&text)
        };
        Ok((records, helper_pid))
    }

    async fn matching(&self, target: &str) -> Result<Vec<u32>, ProcessError> {
        let (records, helper_pid) = self.list().await?;
        let mut matcher = ProcessMatcher::new(target);
        if let Some(pid) = helper_pid {
            matcher = matcher.excluding(pid);
        }
        Ok(matcher.select(&records))
    }

    /// Runs a kill command; a non-zero exit means the process already went away
    async fn run_kill(&self, program: &str, args: &[String]) -> Result<(), ProcessError> {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !status.success() {
            debug!("{} {:?} exited with {}", program, args, status);
        }
        Ok(())
    }

    async fn kill_tree(&self, pid: u32) -> Result<(), ProcessError> {
        if cfg!(windows) {
            let args = ["/t", "/f", "/pid"]
                .iter()
                .map(|arg| arg.to_string())
                .chain(std::iter::once(pid.to_string()))
                .collect::<Vec<_>>();
            self.run_kill("taskkill", &args).await
        } else {
            self.run_kill("pkill", &["-KILL".to_string(), "-P".to_string(), pid.to_string()])
                .await?;
            self.run_kill("kill", &["-KILL".to_string(), pid.to_string()])
                .await
        }
    }
}

#[async_trait]
impl ProcessControl for SystemProcesses {
    async fn is_running(&self, target: &str) -> Result<bool, ProcessError> {
        Ok(!self.matching(target).await?.is_empty())
    }

    async fn terminate(&self, target: &str) -> Result<(), ProcessError> {
        let pids = self.matching(target).await?;
        kill_each(&pids, target, |pid| self.kill_tree(pid)).await;
        Ok(())
    }

    async fn launch(&self, script: &Path, working_dir: &Path) -> Result<(), ProcessError> {
        // Relative paths would be resolved again from inside working_dir
        let absolute = |path: &Path| {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .map_err(|source| ProcessError::Script {
                    path: path.to_path_buf(),
                    source,
                })
        };
        let script = absolute(script)?;
        let working_dir = absolute(working_dir)?;
        let (script, working_dir) = (script.as_path(), working_dir.as_path());

        let mut command = if cfg!(windows) {
            let mut command = Command::new("cmd");
            command
                .arg("/C")
                .arg("start")
                .arg("")
                .arg("/D")
                .arg(working_dir)
                .arg(script);
            command
        } else {
            let mut command = Command::new("sh");
            command.arg(script);
            command
        };

        // Own process group, so a Ctrl+C aimed at the updater spares the server
        #[cfg(unix)]
        command.process_group(0);

        let program = if cfg!(windows) { "cmd" } else { "sh" };
        command
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|child| {
                debug!("Launched {} as pid {:?}", script.display(), child.id());
            })
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })
    }
}

/// Kills every pid in turn; one failure does not spare the rest
async fn kill_each<F, Fut>(pids: &[u32], target: &str, kill: F)
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<(), ProcessError>>,
{
    for &pid in pids {
        info!("Killing process {} ({})", pid, target);
        if let Err(e) = kill(pid).await {
            warn!("Could not kill process {}: {}", pid, e);
        }
    }
}

/// Lifecycle operations the update loop relies on
///
/// Wraps a `ProcessControl` and turns its errors into log lines.
pub struct ProcessManager {
    control: Box<dyn ProcessControl>,
}

impl ProcessManager {
    pub fn new(control: Box<dyn ProcessControl>) -> Self {
        Self { control }
    }

    pub async fn is_running(&self, target: &str) -> bool {
        match self.control.is_running(target).await {
            Ok(running) => running,
            Err(e) => {
                warn!("Could not query processes for {}: {}", target, e);
                false
            }
        }
    }

    pub async fn terminate(&self, target: &str) {
        if let Err(e) = self.control.terminate(target).await {
            warn!("Could not terminate {}: {}", target, e);
        }
    }

    /// Kills the server and its launcher, then starts the launch script again
    ///
    /// Returns whether a launch was attempted successfully.
    pub async fn restart(&self, config: &Config) -> bool {
        self.terminate(&config.process_name).await;

        let (Some(launch_file), Some(script)) = (config.launch_file.as_deref(), config.launch_path())
        else {
            warn!("No launch script configured, cannot start the server");
            return false;
        };

        self.terminate(launch_file).await;

        info!("Starting {}", script.display());
        match self.control.launch(&script, &config.launch_dir).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not start {}: {}", script.display(), e);
                false
            }
        }
    }
}
