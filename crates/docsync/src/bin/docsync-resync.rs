//! One-shot full resync of the publish branch into the metadata cache.
//!
//! Usage: `docsync-resync <config.yaml>`

use std::process::ExitCode;

use docsync::{load_config, logging, DocSync};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info");

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: docsync-resync <config.yaml>");
        return ExitCode::from(2);
    };

    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match DocSync::open(&config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match engine
        .reconciler()
        .resync_branch(engine.publish_branch())
        .await
    {
        Ok(report) => {
            println!(
                "{}: {} scanned, {} updated, {} tombstoned, {} failed at {}",
                report.branch,
                report.scanned,
                report.updated.len(),
                report.tombstoned.len(),
                report.failed.len(),
                report.revision
            );
            if report.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("Resync failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
