//! Runtime parameters for the update loop
//!
//! Values come from three places: command-line flags, an optional JSON config
//! file, and built-in defaults. For every field the file wins over the flag
//! unless `--force-cli` is given, and the default applies when neither is set.
//! The file is re-read whenever its modification time changes, so operators
//! can retune a running updater without restarting it.

use crate::error::ConfigError;
use chrono::{DateTime, Local, NaiveDate, Weekday};
use clap::Parser;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::{DEFAULT_RCON_ADDRESS, SERVER_APP_ID};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_CONFIG_FILE: &str = "updater.json";
pub const DEFAULT_MANIFEST: &str = "steamapps/appmanifest_258550.acf";
pub const DEFAULT_ANNOUNCE: &str = "Update released by Facepunch, server rebooting to update";
pub const DEFAULT_PROCESS_NAME: &str = "RustDedicated";
pub const DEFAULT_STEAMCMD: &str = "steamcmd";
pub const DEFAULT_SEED_WEEKDAY: Weekday = Weekday::Thu;

const DEFAULT_TIMER_MS: u64 = 60_000;
const DEFAULT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_UNAVAIL: u32 = 10;
const DEFAULT_FAILSAFE: u32 = 5;
const DEFAULT_TICKS: u32 = 5;
const DEFAULT_RESTART_GRACE_MS: u64 = 10_000;

/// Command line arguments
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path of the JSON config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Server console address as host:port
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Server console password
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Location of the server's Steam app manifest
    #[arg(short = 'm', long)]
    pub manifest: Option<PathBuf>,

    /// Name of the script that launches the server
    #[arg(short = 'l', long)]
    pub launch_file: Option<String>,

    /// Directory holding the launch script
    #[arg(short = 'd', long)]
    pub launch_dir: Option<PathBuf>,

    /// Executable name of the server process
    #[arg(long)]
    pub process_name: Option<String>,

    /// Steam app id of the managed server
    #[arg(long)]
    pub app_id: Option<String>,

    /// Path of the steamcmd executable
    #[arg(long)]
    pub steamcmd: Option<PathBuf>,

    /// Do not start the server when it is not running
    #[arg(short = 'i', long)]
    pub no_autostart: bool,

    /// Do not kill and restart a server that stopped responding for good
    #[arg(short = 'j', long)]
    pub no_autofail: bool,

    /// Do not update the server when a new build is published
    #[arg(short = 'k', long)]
    pub no_autoupdate: bool,

    /// Loop interval in milliseconds
    #[arg(short = 't', long)]
    pub timer: Option<u64>,

    /// Health check timeout in milliseconds
    #[arg(short = 'o', long)]
    pub timeout: Option<u64>,

    /// Failed health checks before an unavailability notice
    #[arg(short = 'n', long)]
    pub unavail: Option<u32>,

    /// Multiplier applied to --unavail before the server is force restarted
    #[arg(short = 'x', long)]
    pub failsafe: Option<u32>,

    /// In-game message shown before rebooting for an update
    #[arg(short = 'a', long)]
    pub announce: Option<String>,

    /// How many times the update message is repeated
    #[arg(short = 'b', long)]
    pub ticks: Option<u32>,

    /// Weekday whose first occurrence in a month rotates the map seed
    #[arg(long)]
    pub seed_weekday: Option<String>,

    /// Milliseconds to wait after starting a server that was not running
    #[arg(long)]
    pub restart_grace: Option<u64>,

    /// Send notifications about updates
    #[arg(short = 'w', long)]
    pub notify_update: bool,

    /// Send notifications about unavailability
    #[arg(short = 'u', long)]
    pub notify_unavail: bool,

    /// Recipients of update notifications
    #[arg(long, value_delimiter = ',')]
    pub email_update: Vec<String>,

    /// Recipients of unavailability notifications
    #[arg(long, value_delimiter = ',')]
    pub email_unavail: Vec<String>,

    /// Webhook receiving notifications as JSON
    #[arg(long)]
    pub notify_url: Option<String>,

    /// Command-line options override the config file
    #[arg(short = 'f', long)]
    pub force_cli: bool,
}

/// Raw contents of the JSON config file; every key is optional
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub server: Option<String>,
    pub password: Option<String>,
    pub app_id: Option<String>,
    pub manifest: Option<PathBuf>,
    pub launchfile: Option<String>,
    pub launchdir: Option<PathBuf>,
    pub process_name: Option<String>,
    pub steamcmd: Option<PathBuf>,
    pub autostart: Option<bool>,
    pub autofail: Option<bool>,
    pub autoupdate: Option<bool>,
    pub timer: Option<u64>,
    pub timeout: Option<u64>,
    pub unavail: Option<u32>,
    pub failsafe: Option<u32>,
    pub announce: Option<String>,
    pub ticks: Option<u32>,
    pub seed_weekday: Option<String>,
    pub seed_date: Option<String>,
    pub restart_grace: Option<u64>,
    pub emupdate: Option<bool>,
    pub emunavail: Option<bool>,
    pub email_update: Option<Vec<String>>,
    pub email_unavail: Option<Vec<String>>,
    pub notify_url: Option<String>,
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Picks one field's value: file, then flag, then default
///
/// `force_cli` flips the first two so a flag beats the file.
pub fn resolve<T>(file: Option<T>, cli: Option<T>, default: T, force_cli: bool) -> T {
    match (file, cli) {
        (_, Some(cli)) if force_cli => cli,
        (Some(file), _) => file,
        (None, Some(cli)) => cli,
        (None, None) => default,
    }
}

fn resolve_opt<T>(file: Option<T>, cli: Option<T>, force_cli: bool) -> Option<T> {
    resolve(file.map(Some), cli.map(Some), None, force_cli)
}

/// Accepts `2024-02-01` or a full RFC 3339 timestamp
pub fn parse_seed_date(text: &str) -> Result<NaiveDate, ConfigError> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }

    DateTime::parse_from_rfc3339(text)
        .map(|stamp| stamp.with_timezone(&Local).date_naive())
        .map_err(|_| ConfigError::Invalid {
            field: "seedDate",
            message: format!("unrecognised date {:?}", text),
        })
}

/// Fully resolved parameters the engine reads every tick
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server: String,
    pub password: String,
    pub app_id: String,
    pub manifest: PathBuf,
    pub launch_file: Option<String>,
    pub launch_dir: PathBuf,
    pub process_name: String,
    pub steamcmd: PathBuf,
    pub autostart: bool,
    pub autofail: bool,
    pub autoupdate: bool,
    pub tick_interval: Duration,
    pub timeout: Duration,
    pub unavail_threshold: u32,
    pub failsafe_multiplier: u32,
    pub announce: String,
    pub announce_quota: u32,
    pub seed_weekday: Weekday,
    pub seed_date: Option<NaiveDate>,
    pub restart_grace: Duration,
    pub notify_update: bool,
    pub notify_unavail: bool,
    pub email_update: Vec<String>,
    pub email_unavail: Vec<String>,
    pub notify_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_RCON_ADDRESS.to_string(),
            password: String::new(),
            app_id: SERVER_APP_ID.to_string(),
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            launch_file: None,
            launch_dir: PathBuf::from("."),
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            steamcmd: PathBuf::from(DEFAULT_STEAMCMD),
            autostart: true,
            autofail: true,
            autoupdate: true,
            tick_interval: Duration::from_millis(DEFAULT_TIMER_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            unavail_threshold: DEFAULT_UNAVAIL,
            failsafe_multiplier: DEFAULT_FAILSAFE,
            announce: DEFAULT_ANNOUNCE.to_string(),
            announce_quota: DEFAULT_TICKS,
            seed_weekday: DEFAULT_SEED_WEEKDAY,
            seed_date: None,
            restart_grace: Duration::from_millis(DEFAULT_RESTART_GRACE_MS),
            notify_update: false,
            notify_unavail: false,
            email_update: Vec::new(),
            email_unavail: Vec::new(),
            notify_url: None,
        }
    }
}

impl Config {
    pub fn resolve(args: &Args, file: &FileConfig) -> Result<Self, ConfigError> {
        let force = args.force_cli;
        let defaults = Config::default();
        let non_empty = |list: &Vec<String>| (!list.is_empty()).then(|| list.clone());

        let timer = resolve(file.timer, args.timer, DEFAULT_TIMER_MS, force);
        if timer == 0 {
            return Err(ConfigError::Invalid {
                field: "timer",
                message: "must be greater than zero".to_string(),
            });
        }

        let unavail_threshold = resolve(file.unavail, args.unavail, DEFAULT_UNAVAIL, force);
        if unavail_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "unavail",
                message: "must be at least 1".to_string(),
            });
        }

        let failsafe_multiplier = resolve(file.failsafe, args.failsafe, DEFAULT_FAILSAFE, force);
        if failsafe_multiplier == 0 {
            return Err(ConfigError::Invalid {
                field: "failsafe",
                message: "must be at least 1".to_string(),
            });
        }

        let weekday = resolve(
            file.seed_weekday.clone(),
            args.seed_weekday.clone(),
            DEFAULT_SEED_WEEKDAY.to_string(),
            force,
        );
        let seed_weekday = weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigError::Invalid {
                field: "seedWeekday",
                message: format!("unknown weekday {:?}", weekday),
            })?;

        let seed_date = file.seed_date.as_deref().map(parse_seed_date).transpose()?;

        let launch_file = resolve_opt(file.launchfile.clone(), args.launch_file.clone(), force)
            .filter(|name| !name.trim().is_empty());

        Ok(Self {
            server: resolve(file.server.clone(), args.server.clone(), defaults.server, force),
            password: resolve(
                file.password.clone(),
                args.password.clone(),
                defaults.password,
                force,
            ),
            app_id: resolve(file.app_id.clone(), args.app_id.clone(), defaults.app_id, force),
            manifest: resolve(
                file.manifest.clone(),
                args.manifest.clone(),
                defaults.manifest,
                force,
            ),
            launch_file,
            launch_dir: resolve(
                file.launchdir.clone(),
                args.launch_dir.clone(),
                defaults.launch_dir,
                force,
            ),
            process_name: resolve(
                file.process_name.clone(),
                args.process_name.clone(),
                defaults.process_name,
                force,
            ),
            steamcmd: resolve(
                file.steamcmd.clone(),
                args.steamcmd.clone(),
                defaults.steamcmd,
                force,
            ),
            autostart: resolve(file.autostart, args.no_autostart.then_some(false), true, force),
            autofail: resolve(file.autofail, args.no_autofail.then_some(false), true, force),
            autoupdate: resolve(file.autoupdate, args.no_autoupdate.then_some(false), true, force),
            tick_interval: Duration::from_millis(timer),
            timeout: Duration::from_millis(resolve(
                file.timeout,
                args.timeout,
                DEFAULT_TIMEOUT_MS,
                force,
            )),
            unavail_threshold,
            failsafe_multiplier,
            announce: resolve(
                file.announce.clone(),
                args.announce.clone(),
                defaults.announce,
                force,
            ),
            announce_quota: resolve(file.ticks, args.ticks, DEFAULT_TICKS, force),
            seed_weekday,
            seed_date,
            restart_grace: Duration::from_millis(resolve(
                file.restart_grace,
                args.restart_grace,
                DEFAULT_RESTART_GRACE_MS,
                force,
            )),
            notify_update: resolve(file.emupdate, args.notify_update.then_some(true), false, force),
            notify_unavail: resolve(
                file.emunavail,
                args.notify_unavail.then_some(true),
                false,
                force,
            ),
            email_update: resolve(
                file.email_update.clone(),
                non_empty(&args.email_update),
                Vec::new(),
                force,
            ),
            email_unavail: resolve(
                file.email_unavail.clone(),
                non_empty(&args.email_unavail),
                Vec::new(),
                force,
            ),
            notify_url: resolve_opt(file.notify_url.clone(), args.notify_url.clone(), force),
        })
    }

    /// Command-line fragment identifying a live server: the launcher when
    /// there is one, otherwise the server executable itself
    pub fn liveness_target(&self) -> &str {
        self.launch_file.as_deref().unwrap_or(&self.process_name)
    }

    pub fn launch_path(&self) -> Option<PathBuf> {
        self.launch_file
            .as_ref()
            .map(|file| self.launch_dir.join(file))
    }

    /// Failed checks after which the server is killed and relaunched
    pub fn failsafe_ticks(&self) -> u32 {
        self.unavail_threshold.saturating_mul(self.failsafe_multiplier)
    }

    pub fn log_summary(&self) {
        info!("Console:        {}", self.server);
        info!(
            "Password:       {}",
            if self.password.is_empty() { "(none)" } else { "********" }
        );
        info!("App id:         {}", self.app_id);
        info!("Manifest:       {}", self.manifest.display());
        match self.launch_path() {
            Some(path) => info!("Launch script:  {}", path.display()),
            None => info!("Launch script:  (none)"),
        }
        info!("Process name:   {}", self.process_name);
        info!(
            "Auto start/fail/update: {}/{}/{}",
            self.autostart, self.autofail, self.autoupdate
        );
        info!(
            "Timer {:?}, timeout {:?}, unavail {} x failsafe {}",
            self.tick_interval, self.timeout, self.unavail_threshold, self.failsafe_multiplier
        );
        info!("Announce:       {:?} x{}", self.announce, self.announce_quota);
        info!(
            "Seed rotation:  first {} of the month, last {}",
            self.seed_weekday,
            self.seed_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| "never".to_string())
        );
        info!(
            "Notifications:  update {} {:?}, unavail {} {:?}",
            self.notify_update, self.email_update, self.notify_unavail, self.email_unavail
        );
    }
}

/// Loads the config file and notices when it changes on disk
#[derive(Debug)]
pub struct ConfigLoader {
    args: Args,
    path: PathBuf,
    required: bool,
    modified: Option<SystemTime>,
}

impl ConfigLoader {
    /// A file named with `--config` must exist; the default one may be absent
    pub fn new(args: Args) -> Self {
        let required = args.config.is_some();
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self {
            args,
            path,
            required,
            modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&mut self) -> Result<Config, ConfigError> {
        match fs::metadata(&self.path) {
            Ok(metadata) => {
                let file = self.read_file()?;
                self.modified = metadata.modified().ok();
                Config::resolve(&self.args, &file)
            }
            Err(e) if e.kind() == ErrorKind::NotFound && !self.required => {
                info!(
                    "No config file at {}, using command-line options",
                    self.path.display()
                );
                Config::resolve(&self.args, &FileConfig::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Returns a new config only when the file's modification time moved
    pub async fn refresh(&mut self) -> Result<Option<Config>, ConfigError> {
        let modified = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.modified().ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Config file {} is gone, keeping current values", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if modified.is_some() && modified == self.modified {
            return Ok(None);
        }

        info!("Config file {} changed, reloading", self.path.display());
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Read {
                path: self.path.clone(),
                source,
            })?;
        let file = FileConfig::parse(&self.path, &text)?;
        self.modified = modified;
        Config::resolve(&self.args, &file).map(Some)
    }

    /// Records the seed rotation date in the config file, keeping every
    /// other key as it was
    pub async fn persist_seed_date(&self, date: NaiveDate) -> Result<(), ConfigError> {
        let mut document: Map<String, Value> = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => Map::new(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        document.insert(
            "seedDate".to_string(),
            Value::String(date.format("%Y-%m-%d").to_string()),
        );

        let text = serde_json::to_string_pretty(&Value::Object(document)).map_err(|source| {
            ConfigError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;

        tokio::fs::write(&self.path, text)
            .await
            .map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn read_file(&self) -> Result<FileConfig, ConfigError> {
        let text = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        FileConfig::parse(&self.path, &text)
    }
}
