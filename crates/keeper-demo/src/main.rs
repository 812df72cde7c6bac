use clap::Parser;
use tracing::{info, warn};

use keeper_demo::{Cli, DemoConfig, logging, scenario};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DemoConfig::load(&cli)?;
    logging::init_logging(&config.log_level)?;
    keeper_lock::describe_lock_metrics();

    info!(
        clients = config.clients,
        rounds = config.rounds,
        root_path = %config.root_path,
        lock_suffix = %config.lock_suffix,
        "Starting lock demo"
    );

    let report = scenario::run(&config).await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} clients x {} rounds: {} acquisitions, {} conflicts, {} failed releases in {} ms",
            report.clients,
            report.rounds,
            report.acquisitions,
            report.conflicts,
            report.failed_releases,
            report.elapsed_ms
        );
    }

    if report.conflicts > 0 {
        warn!(conflicts = report.conflicts, "Resource was used concurrently");
        anyhow::bail!("mutual exclusion violated {} times", report.conflicts);
    }
    Ok(())
}
