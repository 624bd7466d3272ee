//! The update loop
//!
//! Each tick the engine reloads its config if the file changed, then acts on
//! the current `Operation`:
//!
//! - `Running`: health check, escalation when the server does not answer,
//!   otherwise update detection. A new build moves straight into `Announce`.
//! - `Announce`: one in-game warning per tick until the quota is used up, then
//!   `Upgrade` on the same tick.
//! - `Upgrade`: notify, send `quit`, rotate the map seed when due. Always
//!   followed by `Reboot`.
//! - `Reboot`: wait for the server to answer again, escalating like `Running`
//!   while it does not.
//!
//! All state lives in an `EngineState` passed into every step. The engine
//! itself only holds its collaborators and the current config.

use crate::config::{Config, ConfigLoader};
use crate::detector::UpdateDetector;
use crate::monitor;
use crate::notify::{subject_prefix, Notifier};
use crate::process::ProcessManager;
use crate::seed::{self, SeedPair};
use crate::state::{EngineState, Operation};
use chrono::{Local, NaiveDate};
use console::CommandChannel;
use log::{debug, info, warn};
use shared::{RconReply, SHUTDOWN_COMMAND};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Seconds left before the reboot, announced with each warning
pub fn announcement_countdown(tick_interval: Duration, quota: u32, sent: u32) -> u64 {
    let remaining = u128::from(quota.saturating_sub(sent));
    (tick_interval.as_millis() * remaining / 1000) as u64
}

/// In-game `say` command warning about an upcoming reboot
pub fn announcement_command(build_id: &str, text: &str, seconds: u64) -> String {
    format!("say \"Build_ID {} - {} ({} seconds)\"", build_id, text, seconds)
}

pub struct Engine {
    config: Config,
    loader: Option<ConfigLoader>,
    channel: Box<dyn CommandChannel>,
    detector: UpdateDetector,
    processes: ProcessManager,
    notifier: Box<dyn Notifier>,
    prefix: String,
}

impl Engine {
    pub fn new(
        config: Config,
        channel: Box<dyn CommandChannel>,
        detector: UpdateDetector,
        processes: ProcessManager,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            loader: None,
            channel,
            detector,
            processes,
            notifier,
            prefix: subject_prefix(None),
        }
    }

    /// Reloads config from `loader` between ticks and persists seed dates to it
    pub fn with_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs ticks until `shutdown` resolves, then returns the final state
    ///
    /// The shutdown future is only watched during the sleep between ticks.
    pub async fn run<F>(&mut self, shutdown: F) -> EngineState
    where
        F: Future<Output = ()>,
    {
        let mut state = EngineState::new(self.config.seed_date);
        self.refresh_prefix().await;
        tokio::pin!(shutdown);

        info!(
            "Watching {} every {:?}",
            self.config.server, self.config.tick_interval
        );

        while state.operation != Operation::Stop {
            self.tick(&mut state, Local::now().date_naive()).await;

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, leaving {}", state.operation);
                    state.operation = Operation::Stop;
                }
                _ = sleep(self.config.tick_interval) => {}
            }
        }

        state
    }

    /// One pass of the loop; `today` drives seed rotation
    pub async fn tick(&mut self, state: &mut EngineState, today: NaiveDate) {
        self.refresh_config(state).await;

        let before = state.operation;
        match state.operation {
            Operation::Running => self.check_running(state, today).await,
            Operation::Announce => {
                self.detector
                    .refresh_local(&self.config.manifest, state)
                    .await;
                self.advance_update(state, today).await;
            }
            Operation::Upgrade => self.upgrade(state, today).await,
            Operation::Reboot => self.check_reboot(state).await,
            Operation::Stop => {}
        }

        if state.operation != before {
            debug!("{} -> {}", before, state.operation);
        }
    }

    async fn check_running(&mut self, state: &mut EngineState, today: NaiveDate) {
        if !self.probe(state).await {
            self.escalate(state).await;
            return;
        }

        if state.unavailable_ticks >= self.config.unavail_threshold {
            self.notify_unavail("back online after being unresponsive");
        }
        state.unavailable_ticks = 0;

        let update = self
            .detector
            .detect(&self.config.manifest, &self.config.app_id, state)
            .await;
        if !update {
            return;
        }

        if !self.config.autoupdate {
            debug!(
                "Build {} available but auto update is off",
                state.remote_build.as_deref().unwrap_or_default()
            );
            return;
        }

        info!(
            "Build {} released, installed is {}",
            state.remote_build.as_deref().unwrap_or_default(),
            state.local_build.as_deref().unwrap_or_default()
        );
        state.operation = Operation::Announce;
        self.advance_update(state, today).await;
    }

    /// Sends the next warning, or starts the upgrade once warnings are done
    async fn advance_update(&mut self, state: &mut EngineState, today: NaiveDate) {
        if !state.update_available() {
            info!("Update no longer pending, back to normal operation");
            state.operation = Operation::Running;
            state.announce_ticks_sent = 0;
            state.announced_build = None;
            return;
        }

        let remote = state.remote_build.clone().unwrap_or_default();
        if state.announced_build.as_deref() != Some(remote.as_str()) {
            state.announce_ticks_sent = 0;
            state.announced_build = Some(remote.clone());
        }

        let quota = self.config.announce_quota;
        if !self.config.announce.is_empty() && state.announce_ticks_sent < quota {
            let seconds =
                announcement_countdown(self.config.tick_interval, quota, state.announce_ticks_sent);
            let command = announcement_command(&remote, &self.config.announce, seconds);
            info!(
                "Announcing update {} of {}: {} seconds left",
                state.announce_ticks_sent + 1,
                quota,
                seconds
            );
            self.command(state, &command).await;
            state.announce_ticks_sent += 1;
            return;
        }

        state.announce_ticks_sent = 0;
        state.operation = Operation::Upgrade;
        self.upgrade(state, today).await;
    }

    async fn upgrade(&mut self, state: &mut EngineState, today: NaiveDate) {
        let remote = state.remote_build.clone().unwrap_or_default();
        let message = format!("rebooting for update to buildid {}", remote);
        info!("Server {}", message);
        self.notify_update(&message);

        state.operation = Operation::Reboot;
        state.unavailable_ticks = 0;
        state.announced_build = None;

        if self.command(state, SHUTDOWN_COMMAND).await.is_none() {
            warn!("Shutdown command got no reply, waiting for the reboot anyway");
        }

        self.rotate_seed_if_due(state, today).await;
    }

    async fn check_reboot(&mut self, state: &mut EngineState) {
        if !self.probe(state).await {
            self.escalate(state).await;
            return;
        }

        self.detector.invalidate(state);
        self.detector
            .refresh_local(&self.config.manifest, state)
            .await;

        let message = format!(
            "back online after update to buildid {}",
            state.local_build.as_deref().unwrap_or("unknown")
        );
        info!("Server {}", message);
        self.notify_update(&message);

        state.operation = Operation::Running;
        state.unavailable_ticks = 0;
    }

    /// Response to one failed health check
    async fn escalate(&mut self, state: &mut EngineState) {
        state.unavailable_ticks = state.unavailable_ticks.saturating_add(1);

        // Without a launch script nothing can be started, so keep counting
        let target = self.config.liveness_target().to_string();
        if self.config.autostart
            && self.config.launch_path().is_some()
            && !self.processes.is_running(&target).await
        {
            let message = "not running, starting now";
            warn!("Server {}", message);
            if self.processes.restart(&self.config).await {
                state.unavailable_ticks = 0;
                self.notify_unavail(message);

                if !self.config.restart_grace.is_zero() {
                    sleep(self.config.restart_grace).await;
                }
                return;
            }
        }

        if self.config.autofail && state.unavailable_ticks >= self.config.failsafe_ticks() {
            let message = "fatal unresponsive, killing task";
            warn!("Server {} after {} checks", message, state.unavailable_ticks);
            self.processes.restart(&self.config).await;
            state.unavailable_ticks = 0;
            self.notify_unavail(message);
            return;
        }

        warn!(
            "Server not responding ({} of {} checks)",
            state.unavailable_ticks,
            self.config.failsafe_ticks()
        );
        if state.unavailable_ticks == self.config.unavail_threshold {
            self.notify_unavail("not responding");
        }
    }

    async fn rotate_seed_if_due(&mut self, state: &mut EngineState, today: NaiveDate) {
        if !seed::rotation_due(today, self.config.seed_weekday, state.seed_change_date) {
            return;
        }

        let Some(script) = self.config.launch_path() else {
            debug!("No launch script, skipping seed rotation");
            return;
        };

        state.seed_change_date = Some(today);
        self.config.seed_date = Some(today);
        if let Some(loader) = &self.loader {
            if let Err(e) = loader.persist_seed_date(today).await {
                warn!("Could not record seed rotation date: {}", e);
            }
        }

        let seeds = SeedPair::random(&mut rand::thread_rng());
        match seed::rewrite_launch_file(&script, &self.config.process_name, seeds).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!("Seed rotation failed: {}", e);
                return;
            }
        }

        let message = format!(
            "update on first {} of the month, changing to new {}",
            self.config.seed_weekday, seeds
        );
        info!("Server {}", message);
        self.notify_update(&message);
        self.processes.restart(&self.config).await;
    }

    async fn probe(&self, state: &mut EngineState) -> bool {
        let identifier = state.next_identifier();
        monitor::is_available(self.channel.as_ref(), identifier, self.config.timeout).await
    }

    /// Sends one command under the health timeout, logging any failure
    async fn command(&self, state: &mut EngineState, command: &str) -> Option<RconReply> {
        let identifier = state.next_identifier();
        match timeout(self.config.timeout, self.channel.send(command, identifier)).await {
            Ok(Ok(reply)) if reply.is_error() => {
                warn!("Command {:?} failed: {}", command, reply.message);
                None
            }
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!("Command {:?} failed: {}", command, e);
                None
            }
            Err(_) => {
                warn!("Command {:?} timed out", command);
                None
            }
        }
    }

    async fn refresh_config(&mut self, state: &mut EngineState) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };

        let config = match loader.refresh().await {
            Ok(Some(config)) => config,
            Ok(None) => return,
            Err(e) => {
                warn!("Keeping previous config: {}", e);
                return;
            }
        };

        if config.server != self.config.server || config.password != self.config.password {
            info!("Console target changed to {}", config.server);
            self.channel.retarget(&config.server, &config.password);
        }
        if config.notify_url != self.config.notify_url {
            self.notifier.retarget(config.notify_url.as_deref());
        }
        if config.steamcmd != self.config.steamcmd {
            self.detector.retarget_remote(&config.steamcmd);
        }

        if config.seed_date > state.seed_change_date {
            state.seed_change_date = config.seed_date;
        }

        config.log_summary();
        self.config = config;
        self.refresh_prefix().await;
    }

    async fn refresh_prefix(&mut self) {
        let hostname = match self.config.launch_path() {
            Some(path) => seed::read_hostname(&path).await,
            None => None,
        };
        self.prefix = subject_prefix(hostname.as_deref());
    }

    fn notify_update(&self, message: &str) {
        if self.config.notify_update {
            let subject = format!("{}{}", self.prefix, message);
            self.notifier
                .send(&self.config.email_update, &subject, &subject);
        }
    }

    fn notify_unavail(&self, message: &str) {
        if self.config.notify_unavail {
            let subject = format!("{}{}", self.prefix, message);
            self.notifier
                .send(&self.config.email_unavail, &subject, &subject);
        }
    }
}
