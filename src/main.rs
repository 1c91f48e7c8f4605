//! onion-embed CLI application entry point.
//!
//! Runs the embedded Arti engine as a standalone local SOCKS proxy. This is the
//! same controller a host drives through the C ABI, wired to the command line:
//! useful for trying a data directory or port before embedding.
//!
//! # Startup Flow
//!
//! ```text
//!   ┌──────────────────┐
//!   │  Parse CLI Args  │ ◄── clap parses command-line arguments
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐       ┌─────────────────┐
//!   │ --generate_config│──────▶│ Write default   │────▶ Exit
//!   │    specified?    │       │ config & exit   │
//!   └────────┬─────────┘       └─────────────────┘
//!            │ No
//!            ▼
//!   ┌──────────────────┐
//!   │  Load Config     │ ◄── Defaults → File → CLI
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ initialize +     │ ◄── bridged log lines printed to stdout
//!   │ start_proxy      │
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ Wait for Ctrl-C  │
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ stop, exit       │
//!   └──────────────────┘
//! ```
//!
//! # Usage Examples
//!
//! ```bash
//! # Run on the default port 9050
//! onion-embed --data-dir /var/lib/onion-embed
//!
//! # Custom port, verbose engine output
//! onion-embed --data-dir /tmp/tor --port 9150 --loglevel DEBUG
//!
//! # Generate default configuration file
//! onion-embed --generate_config onion-embed.toml
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Error (see stderr for details) |
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `ONION_EMBED_CONFIG` | Path to config file (equivalent to `--config`) |
//! | `RUST_LOG` | Overrides `--loglevel` for local output |

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use onion_embed::arti::ArtiFactory;
use onion_embed::{config, logger, version, CliArgs, Config, Error, LogLevel, LogRecord};
use onion_embed::{plog_fmt, LogBridge, RuntimeController};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> onion_embed::Result<()> {
    let args = CliArgs::parse();

    if let Some(ref output_path) = args.generate_config {
        let toml = Config::default().to_toml()?;
        std::fs::write(output_path, toml)?;
        println!("Wrote default config to {}", output_path.display());
        return Ok(());
    }

    let config = config::load_config(&args)?;
    let data_dir = args
        .data_dir
        .clone()
        .ok_or_else(|| Error::Config("--data-dir is required".to_string()))?;

    let bridge = LogBridge::new(config.log_queue_capacity);
    logger::init(&config, Some(bridge.clone()))?;
    plog_fmt!(LogLevel::Notice, "{} starting", version::version());

    let controller = RuntimeController::with_bridge(ArtiFactory::new(&config), bridge);
    controller.set_log_sink(Some(Arc::new(|record: &LogRecord| {
        println!("{}", record.render());
    })));

    controller.initialize(&data_dir)?;
    if let Err(e) = controller.start_proxy(args.port) {
        controller.stop()?;
        return Err(e);
    }

    wait_for_interrupt()?;

    logger::plog(LogLevel::Notice, "Interrupted, shutting down");
    controller.stop()
}

/// Blocks until Ctrl-C on a small runtime of its own.
///
/// The engine blocks on its private runtime, so controller calls stay outside
/// this one.
fn wait_for_interrupt() -> onion_embed::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;
    Ok(())
}
