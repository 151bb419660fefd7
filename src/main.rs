mod api;
mod bank;
mod chain;
mod config;
mod directory;
mod frameworks;
mod indexer;
mod stream;
mod utils;

use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    api::{router, ApiState},
    bank::client::HttpBankClient,
    chain::client::RpcChainReader,
    config::{BankClientConfig, EventStreamConfig, ProvenanceConfig, ServiceConfig, WorkerConfig},
    directory::SqliteAddressDirectory,
    frameworks::{actor, context::StorageReady, marker_transfer_queue::MarkerTransferQueue},
    indexer::db::{init_pool, run_migrations},
    stream::{
        coin_movement::CoinMovementLedger,
        consumer::{event_stream_supervisor, EventStreamConsumer, StreamSettings},
        source::RpcEventSource,
    },
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenv().ok();

    if let Err(e) = run().await {
        error!(error = ?e, "dcc-bridge stopped");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let service_config = ServiceConfig::new()?;
    let provenance_config = ProvenanceConfig::new()?;
    let stream_config = EventStreamConfig::new()?;
    let bank_config = BankClientConfig::new()?;
    let worker_config = WorkerConfig::new()?;

    let pool = init_pool(service_config.database_url())
        .await
        .context("failed to open database")?;
    run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let storage_ready = StorageReady::new();

    let chain_reader = Arc::new(RpcChainReader::new(
        provenance_config.chain_rpc_url(),
        provenance_config.max_retries(),
    )?);
    let directory = Arc::new(SqliteAddressDirectory::new(pool.clone()));
    let bank_client = Arc::new(HttpBankClient::new(
        bank_config.url(),
        bank_config.request_timeout(),
    )?);

    // event stream
    let source = Arc::new(RpcEventSource::new(
        provenance_config.chain_rpc_url(),
        stream_config.poll_interval(),
    )?);
    let ledger = CoinMovementLedger::new(
        pool.clone(),
        chain_reader.clone(),
        directory.clone(),
        provenance_config.manager_address(),
        bank_config.denom(),
    );
    let consumer = Arc::new(EventStreamConsumer::new(
        pool.clone(),
        chain_reader,
        source,
        ledger,
        StreamSettings {
            stream_id: stream_config.id(),
            epoch_height: stream_config.epoch(),
            contract_address: provenance_config.contract_address().to_string(),
            manager_address: provenance_config.manager_address().to_string(),
            dcc_denom: provenance_config.dcc_denom().to_string(),
            reconnect_delay: stream_config.connect_delay(),
        },
    ));
    tokio::spawn(event_stream_supervisor(consumer, storage_ready.clone()));

    // bank notification queue
    let queue = Arc::new(MarkerTransferQueue::new(
        pool.clone(),
        directory,
        bank_client,
        worker_config.num_workers(),
        worker_config.polling_delay(),
        worker_config.claim_ttl(),
    ));
    info!("Starting marker transfer queue");
    actor::start(queue, storage_ready.clone());

    storage_ready.mark_ready();

    let app = router(ApiState {
        pool,
        stream_id: stream_config.id(),
    });

    let listener = TcpListener::bind(service_config.http_bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", service_config.http_bind_addr()))?;
    info!(addr = %service_config.http_bind_addr(), "Server running at http://");

    axum::serve(listener, app).await?;
    Ok(())
}
