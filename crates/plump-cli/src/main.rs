//! Plump CLI - parent/worker IPC demo driver.

mod demo;
mod process;
mod worker;

use clap::{Parser, Subcommand};
use plump_core::SerializerKind;

#[derive(Parser)]
#[command(name = "plump")]
#[command(about = "Parent/worker RPC and broadcast queue demo")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Wire format for calls, replies and events (binary or json)
    #[arg(short, long, global = true, default_value = "binary")]
    serializer: SerializerKind,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn a worker process, call its commands and print its events
    Demo {
        /// Number of progress events the worker should broadcast
        #[arg(short, long, default_value = "3")]
        events: u32,
    },

    /// Run as a worker (RPC on stdin, broadcast events on stdout)
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging. Always stderr: a worker's stdout is its event channel.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Demo { events } => demo::execute(cli.serializer, events, cli.verbose).await?,

        Commands::Worker => {
            // The dispatch loop blocks; keep it off the runtime threads.
            let serializer = cli.serializer;
            tokio::task::spawn_blocking(move || worker::execute(serializer)).await??;
        }
    }

    Ok(())
}
