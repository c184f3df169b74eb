mod backoff;
mod checkpoint;
mod config;
mod coordinator;
mod entity;
mod errors;
mod sink;
mod source;
mod transform;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::{
    backoff::{
        with_backoff,
        Backoff,
    },
    checkpoint::CheckpointStore,
    config::Config,
    coordinator::Coordinator,
    errors::EtlError,
    sink::elastic::ElasticSink,
    source::postgres::PostgresSource,
};

/// Starts a fresh source connection and sink client, wrapped in the outer
/// backoff that classifies source-connection errors, then runs exactly one
/// full pass over every entity's axes. Grounded in the source system's
/// `etl()` function: one function call per pass, called in a loop by `main`.
async fn run_one_pass(config: &Config) -> Result<coordinator::PassStats, EtlError> {
    with_backoff(Backoff::default(), EtlError::is_retriable_connection_error, || async {
        let source = PostgresSource::connect(&config.postgres(), config.fetch_size as i32).await?;
        let sink = ElasticSink::new(config.elastic_base_url(), config.sink_batch_size);
        let checkpoint = CheckpointStore::load(&config.state_file).await;
        let mut coordinator = Coordinator::new(source, sink, checkpoint, config.bunch_size);
        coordinator.run_pass().await
    })
    .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let etl_timeout = Duration::from_secs(config.etl_timeout);

    tracing::info!(
        postgres_host = %config.postgres_host,
        elastic_host = %config.elastic_host,
        state_file = %config.state_file,
        "starting content-search-sync",
    );

    loop {
        tokio::select! {
            result = run_one_pass(&config) => {
                // `run_one_pass` already retries the two connection-error
                // classes under its own backoff; anything that reaches here
                // is fatal (a validation failure, a checkpoint I/O error, or
                // a connection backoff that gave up) and must end the
                // process with a non-zero exit rather than be logged and
                // retried forever.
                let stats = result?;
                tracing::info!(
                    documents_synced = stats.documents_synced,
                    axes_advanced = stats.axes_advanced,
                    "pass complete",
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal, exiting");
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(etl_timeout) => {},
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal, exiting");
                return Ok(());
            }
        }
    }
}
