//! BlinkySign CLI — run the sign, its remote triggers, and bench tools.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::Parser;

mod cli;

/// Shared shutdown flag for the blocking commands, cleared by Ctrl+C.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser)]
#[command(
    name = "blinkysign",
    version,
    about = "Mute indicator sign for WS281x LED strips"
)]
struct Args {
    /// Output as JSON (for client, colors, config)
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: cli::Command,
}

fn main() {
    let args = Args::parse();

    // Deployment settings from ./.env, without overriding the real environment.
    let dotenv = dotenvy::dotenv();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    match dotenv {
        Ok(path) => log::debug!("loaded {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("ignoring .env: {e}"),
    }

    if let Err(e) = cli::run(args.command, args.json, args.config.as_deref()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
