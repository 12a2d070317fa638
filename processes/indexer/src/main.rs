//! Pharos indexer process.
//!
//! Composition root: loads configuration, validates the required
//! environment, connects the record store, seeds networks on first boot
//! and hands control to the scheduler.

use anyhow::Result;
use clap::Parser;
use config::{Config, Environment, File};
use pharos_common::{
    alert::Alerter, configuration::EnvironmentConfig, Datastore, RecordApiStore,
};
use std::sync::Arc;
use tracing::info;

mod networks;
mod scheduler;

use scheduler::Scheduler;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, value_name = "PATH", default_values_t = vec!["indexer.toml".to_string()])]
    config: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut builder = Config::builder();
    for file in &args.config {
        builder = builder.add_source(File::with_name(file));
    }
    let config = Arc::new(builder.add_source(Environment::default()).build()?);

    // Missing environment is fatal before anything touches the network
    let env = EnvironmentConfig::from_config(&config)?;
    info!(mode = %env.mode, "starting pharos indexer");

    let alerter = Alerter::new(env.mode, &env.discord_webhook_url);
    let store: Arc<dyn Datastore> = Arc::new(
        RecordApiStore::connect(&env.db_host, &env.db_email, &env.db_password).await?,
    );

    let networks = networks::seed_networks(&config, &env, &store).await?;
    info!(count = networks.len(), "networks ready");

    Scheduler::new(config, env, store, alerter).run().await
}
