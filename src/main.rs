//! Director CLI entry point.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use director::cli::Cli;
use director::Script;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for logging.
///
/// Log level is controlled by:
/// 1. `--debug` flag sets level to DEBUG
/// 2. `RUST_LOG` environment variable (if set)
/// 3. Default is WARN, keeping stderr clear for step output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("director=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("director=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// Exit codes: 0 when the script finished ok, 1 when it failed or was
// killed, 2 when it never ran (unreadable file, syntax error, bad option,
// environment declaration error).
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    tracing::debug!("director starting with args: {:?}", cli);

    let text = match fs::read_to_string(&cli.script) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: cannot read {}: {}", cli.script.display(), err);
            return ExitCode::from(2);
        }
    };

    let script = match Script::parse(&text) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(2);
        }
    };

    let status = match script.run(cli.quiet) {
        Ok(status) => status,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(2);
        }
    };

    if cli.snapshot_on_exit {
        match script.snapshot_json() {
            Ok(json) => println!("{}", json),
            Err(err) => eprintln!("error: cannot serialize status: {}", err),
        }
    }

    if status.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
