//! Run a radio capability arbitration scenario against the mock HAL.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use radiocaps_sim::Scenario;

/// Radio capability arbitration scenario runner.
#[derive(Parser, Debug)]
#[command(name = "radiocaps-sim", about = "Replay a capability switch scenario")]
struct Cli {
    /// Scenario TOML file.
    #[arg(long)]
    scenario: PathBuf,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let scenario = Scenario::load(&cli.scenario)?;
    tracing::info!(name = %scenario.name, slots = scenario.slots.len(), "running scenario");

    let report = scenario.run()?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
