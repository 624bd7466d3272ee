//! # Server Updater Library
//!
//! Keeps one dedicated game server on the latest published build. The updater
//! watches the server through its WebSocket console, compares the installed
//! build with the one Steam publishes, and walks the server through an update
//! when they differ: warn the players, ask the server to quit, wait for it to
//! come back on the new build.
//!
//! ## Update Cycle
//!
//! The loop moves between five operations:
//!
//! ```text
//! RUNNING --new build--> ANNOUNCE --quota used--> UPGRADE --> REBOOT --answers--> RUNNING
//! ```
//!
//! `STOP` is entered only when the process is asked to shut down.
//!
//! ## Failure Handling
//!
//! A server that stops answering health checks is handled in escalating steps:
//! - Not in the process table: start it again right away
//! - Silent for `unavail` checks: notify once
//! - Silent for `unavail * failsafe` checks: kill and restart it
//!
//! ## Module Organization
//!
//! - `config`: command-line flags and the JSON config file
//! - `state`: the loop's mutable state and operations
//! - `monitor`: the timed health check
//! - `detector`: installed and published build ids
//! - `process`: OS process table, kill and launch
//! - `seed`: monthly map seed rotation in the launch script
//! - `notify`: notification sinks
//! - `engine`: the loop tying it all together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use console::WebRconClient;
//! use updater::config::Config;
//! use updater::detector::{AppManifestSource, SteamCmdSource, UpdateDetector};
//! use updater::engine::Engine;
//! use updater::notify::LogNotifier;
//! use updater::process::{ProcessManager, SystemProcesses};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let mut engine = Engine::new(
//!         config.clone(),
//!         Box::new(WebRconClient::new(&config.server, &config.password)),
//!         UpdateDetector::new(
//!             Box::new(AppManifestSource::new()),
//!             Box::new(SteamCmdSource::new(&config.steamcmd)),
//!         ),
//!         ProcessManager::new(Box::new(SystemProcesses::new())),
//!         Box::new(LogNotifier),
//!     );
//!
//!     engine
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//! }
//! ```

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod process;
pub mod seed;
pub mod state;

pub use engine::Engine;
pub use state::{EngineState, Operation};
