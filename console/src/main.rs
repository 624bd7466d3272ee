use clap::Parser;
use console::{CommandChannel, WebRconClient};
use log::debug;
use shared::DEFAULT_RCON_ADDRESS;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Console command sent to the server
    command: String,

    /// Server address as host:port
    #[arg(short = 's', long, default_value = DEFAULT_RCON_ADDRESS)]
    server: String,

    /// Console password
    #[arg(short = 'p', long, default_value = "")]
    password: String,

    /// Message identifier echoed back by the server
    #[arg(short = 'i', long, default_value = "1")]
    id: i32,

    /// Print the raw JSON reply instead of the message text
    #[arg(short = 'j', long)]
    json: bool,

    /// Suppress output
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Milliseconds to wait for the reply
    #[arg(short = 't', long, default_value = "5000")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let client = WebRconClient::new(&args.server, &args.password);

    debug!("Sending '{}' to {}", args.command, client.address());

    let reply = tokio::time::timeout(
        Duration::from_millis(args.timeout),
        client.send(&args.command, args.id),
    )
    .await
    .map_err(|_| format!("no reply from {} within {}ms", args.server, args.timeout))??;

    if !args.quiet {
        if args.json {
            println!("{}", serde_json::to_string(&reply)?);
        } else if !reply.message.is_empty() {
            println!("{}", reply.message);
        }
    }

    if reply.is_error() {
        return Err(format!("server reported an error: {}", reply.message).into());
    }

    Ok(())
}
