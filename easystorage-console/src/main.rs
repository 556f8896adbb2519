// easystorage: interactive console plus one-shot upload and download.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use easystorage_core::StorageNode;
use tracing_subscriber::EnvFilter;

mod config;
mod console;

#[derive(Parser, Debug)]
#[command(name = "easystorage", version)]
#[command(about = "Blocking console over a storage node", long_about = None)]
struct Cli {
    /// INI config file (section [easystorage])
    #[arg(short, long, global = true, env = "EASYSTORAGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive console (default)
    Console,

    /// Upload a file, print its CID and the node's SPR, then wait for Enter
    Upload {
        file: PathBuf,
    },

    /// Download content from a peer bootstrapped by SPR
    Download {
        spr: String,
        cid: String,
        output: PathBuf,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let command = cli.command.unwrap_or(Commands::Console);
    let role = match command {
        Commands::Console => config::Role::Console,
        Commands::Upload { .. } => config::Role::Uploader,
        Commands::Download { .. } => config::Role::Downloader,
    };
    let base = config::load(cli.config.as_deref(), role).context("failed to load config")?;
    let engine = easystorage_core::default_engine().context("failed to set up storage engine")?;

    match command {
        Commands::Console => {
            let mut console = console::Console::new(engine, base, io::stdout());
            console.run(io::stdin().lock())?;
        }
        Commands::Upload { file } => {
            let mut node = StorageNode::new(engine, &base).context("failed to create node")?;
            node.start().context("failed to start node")?;

            let cid = node.upload(&file, Some(console::print_progress()));
            println!();
            let cid = cid.with_context(|| format!("upload of {} failed", file.display()))?;
            let spr = node.spr().context("failed to get SPR")?;
            println!("CID: {}", cid);
            println!("SPR: {}", spr);

            println!("\nPress Enter to exit");
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;

            node.stop().context("failed to stop node")?;
            node.destroy().context("failed to destroy node")?;
        }
        Commands::Download { spr, cid, output } => {
            let config = easystorage_core::NodeConfig {
                bootstrap_node: Some(spr),
                ..base
            };
            let mut node = StorageNode::new(engine, &config).context("failed to create node")?;
            node.start().context("failed to start node")?;

            let result = node.download(&cid, &output, Some(console::print_progress()));
            println!();
            result.with_context(|| format!("download of {} failed", cid))?;
            println!("Saved {} to {}", cid, output.display());

            node.stop().context("failed to stop node")?;
            node.destroy().context("failed to destroy node")?;
        }
    }
    Ok(())
}
