use anyhow::Context;

use proving_broker::{BrokerConfig, BrokerDatabase, DatabaseConfig, ProvingBroker, open_database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proving_broker_observability::init();

    let config = BrokerConfig::from_env().context("invalid broker configuration")?;
    let db_config = DatabaseConfig::from_env();
    tracing::info!(?db_config, ?config, "starting proving broker");

    let db = open_database(&db_config)
        .await
        .context("failed to open broker database")?;

    let broker = ProvingBroker::new(db, config)?;
    broker.start().await.context("failed to start broker")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    broker.stop().await;
    broker
        .database()
        .close()
        .await
        .context("failed to close broker database")?;
    Ok(())
}
