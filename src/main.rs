//! dredge — mine issue-tracker exports for pull-request references and
//! the Java imports those pull requests introduced.
//!
//! One-shot batch process: discover pending issue files, fetch each
//! live snapshot, walk every referenced pull request, persist findings,
//! exit. Both ledgers are idempotent, so interrupting a run and starting
//! over is always safe. Configuration is environment-only; see
//! `config.rs`.

mod config;
mod driver;
mod extract;
mod github;
mod http;
mod ledger;
mod mine;

use std::process;

use config::Config;

fn main() {
    setup_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            process::exit(1);
        }
    };

    match driver::run(&config) {
        Ok(summary) => {
            println!(
                "Done: {} file(s) discovered, {} processed, {} failed, {} new import(s) recorded.",
                summary.discovered, summary.processed, summary.failed, summary.imports_recorded
            );
            if summary.failed > 0 {
                println!("Failed files were left off the ledger; re-run to retry them.");
            }
        }
        Err(e) => {
            tracing::error!("{e}");
            process::exit(1);
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
