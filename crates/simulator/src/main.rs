use anyhow::Context;

use entitle_purchases::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    entitle_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;

    let db_path = std::env::var(entitle_simulator::ENV_DB).ok();
    if db_path.is_none() {
        tracing::warn!(
            "{} not set; entitlements are kept in memory only",
            entitle_simulator::ENV_DB
        );
    }

    let report = entitle_simulator::run_session(config, db_path.as_deref()).await?;

    for notice in &report.notices {
        println!("{}", serde_json::to_string(notice)?);
    }
    println!("{}", serde_json::to_string(&report.summary())?);

    Ok(())
}
