use anyhow::Context;

use stockledger_cli::{SimulationConfig, run};
use stockledger_infra::EngineConfig;

fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = SimulationConfig::from_env();
    let report = run(&config, EngineConfig::from_env())?;

    let rendered = serde_json::to_string_pretty(&report).context("failed to render report")?;
    println!("{rendered}");

    if !report.reconciliation.is_consistent() {
        anyhow::bail!(
            "ledger and aggregate disagree: {} discrepancies, {} unpaired transfers",
            report.reconciliation.discrepancies.len(),
            report.reconciliation.unpaired_transfers.len()
        );
    }
    Ok(())
}
