mod config;
mod node;
mod world;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use node::{CoopNode, HostOptions};

#[derive(Parser)]
#[command(name = "coop-node")]
#[command(about = "Headless co-op session host or client")]
struct Args {
    /// TOML file with session settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "Player")]
    name: String,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host a session
    Host {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long)]
        max_players: Option<usize>,

        #[arg(long, help = "Fixed map seed instead of a random one")]
        seed: Option<i32>,

        #[arg(long, default_value_t = 0)]
        difficulty: i32,

        #[arg(long, default_value_t = 8, help = "Wandering enemies to spawn")]
        enemies: usize,
    },
    /// Join a hosted session
    Join {
        address: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = config::load(args.config.as_deref())?;

    let mut node = match args.command {
        Command::Host {
            port,
            max_players,
            seed,
            difficulty,
            enemies,
        } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            if let Some(max_players) = max_players {
                config.max_players = max_players;
            }
            config.validate()?;
            CoopNode::host(
                config,
                &args.name,
                HostOptions {
                    seed,
                    difficulty,
                    enemies,
                },
            )?
        }
        Command::Join { address, port } => {
            if let Some(address) = address {
                config.server_address = address;
            }
            if let Some(port) = port {
                config.server_port = port;
            }
            CoopNode::join(config, &args.name)?
        }
    };

    node.run(args.duration.map(Duration::from_secs));
    log::info!("shut down");
    Ok(())
}
