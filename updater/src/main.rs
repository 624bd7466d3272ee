use clap::Parser;
use console::WebRconClient;
use log::{info, warn};
use updater::config::{Args, ConfigLoader};
use updater::detector::{AppManifestSource, SteamCmdSource, UpdateDetector};
use updater::notify::ConfiguredNotifier;
use updater::process::{ProcessManager, SystemProcesses};
use updater::Engine;

/// Main-method of the application.
/// Loads the config, wires the console, detector and process control together,
/// then runs the update loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new(args);
    let config = loader.load()?;

    info!("Config file: {}", loader.path().display());
    config.log_summary();

    let notifier = ConfiguredNotifier::new(config.notify_url.as_deref())?;

    let detector = UpdateDetector::new(
        Box::new(AppManifestSource::new()),
        Box::new(SteamCmdSource::new(&config.steamcmd)),
    );

    let mut engine = Engine::new(
        config.clone(),
        Box::new(WebRconClient::new(&config.server, &config.password)),
        detector,
        ProcessManager::new(Box::new(SystemProcesses::new())),
        Box::new(notifier),
    )
    .with_loader(loader);

    let state = engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        "Stopped with installed build {}",
        state.local_build.as_deref().unwrap_or("unknown")
    );
    Ok(())
}
