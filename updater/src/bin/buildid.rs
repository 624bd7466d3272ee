use clap::Parser;
use shared::{CLIENT_APP_ID, SERVER_APP_ID};
use std::path::PathBuf;
use updater::config::DEFAULT_STEAMCMD;
use updater::detector::{BuildSource, SteamCmdSource, DEFAULT_BRANCH};

/// Prints the latest published build id
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Branch to look up
    #[arg(short = 'b', long, default_value = DEFAULT_BRANCH)]
    branch: String,

    /// Query the game client instead of the dedicated server
    #[arg(short = 'c', long)]
    client: bool,

    /// Path of the steamcmd executable
    #[arg(long, default_value = DEFAULT_STEAMCMD)]
    steamcmd: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let app_id = if args.client {
        CLIENT_APP_ID
    } else {
        SERVER_APP_ID
    };

    let source = SteamCmdSource::new(args.steamcmd);
    let build_id = source.build_id(app_id, &args.branch).await?;
    println!("{}", build_id);

    Ok(())
}
