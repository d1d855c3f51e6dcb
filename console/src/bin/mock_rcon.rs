//! Standalone mock console endpoint for trying the client without a game server
//!
//! ```text
//! cargo run -p console --features mock-server --bin mock_rcon -- --password secret
//! ```

use clap::Parser;
use console::config::DEFAULT_RCON_PORT;
use console::mock::MockConsole;
use log::info;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "Scriptable RCON endpoint", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_RCON_PORT)]
    port: u16,

    /// Password clients must log in with
    #[arg(short = 'P', long, env = "RCON_PASSWORD", default_value = "")]
    password: String,

    /// Canned reply as command=output; may be repeated
    #[arg(short, long = "respond", value_parser = parse_reply)]
    responses: Vec<(String, String)>,

    /// Largest body per response fragment
    #[arg(long)]
    fragment_size: Option<usize>,

    /// Write replies this many bytes at a time
    #[arg(long)]
    trickle: Option<usize>,
}

fn parse_reply(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(command, output)| (command.to_string(), output.to_string()))
        .ok_or_else(|| format!("expected command=output, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let mut console = MockConsole::new(&args.password)
        .respond("listplayers", "No Players Connected\n")
        .respond("saveworld", "World Saved\n");
    for (command, output) in &args.responses {
        console = console.respond(command, output);
    }
    if let Some(size) = args.fragment_size {
        console = console.fragment_size(size);
    }
    if let Some(chunk) = args.trickle {
        console = console.trickle(chunk);
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("Serving mock console on {}", listener.local_addr()?);
    println!("Mock console ready on {}", listener.local_addr()?);

    console.listen(listener).await?;
    Ok(())
}
