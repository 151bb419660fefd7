use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use std::{str::FromStr, time::Duration};
use tracing::info;
use uuid::Uuid;

/// Default event stream reconnect delay in milliseconds
const DEFAULT_EVENT_STREAM_CONNECT_DELAY_MS: u64 = 5_000;

/// Default interval between checks for new blocks in milliseconds
const DEFAULT_EVENT_STREAM_POLL_INTERVAL_MS: u64 = 2_000;

/// Default number of queue workers
const DEFAULT_NUM_WORKERS: usize = 4;

/// Default queue polling delay in milliseconds
const DEFAULT_POLLING_DELAY_MS: u64 = 1_000;

/// Default time a claimed queue item is withheld from other workers, in seconds
const DEFAULT_CLAIM_TTL_S: u64 = 60;

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow!("{name} must be set"))
}

fn optional<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| anyhow!("{name} has invalid value {value:?}")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    /// SQLite connection string
    database_url: String,

    /// Address the read API listens on
    http_bind_addr: String,
}

impl ServiceConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        dotenv().ok(); // Load `.env` file if present

        let database_url = optional(
            "DATABASE_URL",
            "sqlite://dcc-bridge.db?mode=rwc".to_string(),
        )?;
        let http_bind_addr = optional("HTTP_BIND_ADDR", "0.0.0.0:3000".to_string())?;

        info!(%http_bind_addr, "Loaded service config:");

        Ok(ServiceConfig {
            database_url,
            http_bind_addr,
        })
    }

    /// Getter for `database_url`
    pub(crate) fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Getter for `http_bind_addr`
    pub(crate) fn http_bind_addr(&self) -> &str {
        &self.http_bind_addr
    }
}

/// Chain access and the addresses this instance acts for
#[derive(Debug, Clone)]
pub(crate) struct ProvenanceConfig {
    /// JSON-RPC endpoint of a chain node
    chain_rpc_url: String,

    /// Stablecoin smart contract whose events are tracked
    contract_address: String,

    /// Chain address managed by this instance
    manager_address: String,

    /// Denom of the coin issued by the contract
    dcc_denom: String,

    /// Max retries of block fetches
    max_retries: u64,
}

impl ProvenanceConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        dotenv().ok();

        let chain_rpc_url = optional("CHAIN_RPC_URL", "http://localhost:26657".to_string())?;
        let contract_address = required("CONTRACT_ADDRESS")?;
        let manager_address = required("MANAGER_ADDRESS")?;
        let dcc_denom = required("DCC_DENOM")?;
        let max_retries = optional("CHAIN_RPC_MAX_RETRIES", 3u64)?;

        info!(%chain_rpc_url, %contract_address, %manager_address, %dcc_denom, "Loaded Provenance config:");

        Ok(ProvenanceConfig {
            chain_rpc_url,
            contract_address,
            manager_address,
            dcc_denom,
            max_retries,
        })
    }

    /// Getter for `chain_rpc_url`
    pub(crate) fn chain_rpc_url(&self) -> &str {
        &self.chain_rpc_url
    }

    /// Getter for `contract_address`
    pub(crate) fn contract_address(&self) -> &str {
        &self.contract_address
    }

    /// Getter for `manager_address`
    pub(crate) fn manager_address(&self) -> &str {
        &self.manager_address
    }

    /// Getter for `dcc_denom`
    pub(crate) fn dcc_denom(&self) -> &str {
        &self.dcc_denom
    }

    /// Getter for `max_retries`
    pub(crate) fn max_retries(&self) -> u64 {
        self.max_retries
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventStreamConfig {
    /// Identifier of the logical stream and its cursor
    id: Uuid,

    /// Height the cursor starts at on the first run
    epoch: u64,

    /// Delay before reconnecting after the stream ends
    connect_delay_ms: u64,

    /// Interval between checks for new blocks
    poll_interval_ms: u64,
}

impl EventStreamConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        dotenv().ok();

        let id = Uuid::parse_str(&required("EVENT_STREAM_ID")?)
            .context("EVENT_STREAM_ID must be a UUID")?;
        let epoch = optional("EVENT_STREAM_EPOCH", 0u64)?;
        let connect_delay_ms = optional(
            "EVENT_STREAM_CONNECT_DELAY_MS",
            DEFAULT_EVENT_STREAM_CONNECT_DELAY_MS,
        )?;
        let poll_interval_ms = optional(
            "EVENT_STREAM_POLL_INTERVAL_MS",
            DEFAULT_EVENT_STREAM_POLL_INTERVAL_MS,
        )?;

        info!(%id, epoch, connect_delay_ms, "Loaded event stream config:");

        Ok(EventStreamConfig {
            id,
            epoch,
            connect_delay_ms,
            poll_interval_ms,
        })
    }

    /// Getter for `id`
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Getter for `epoch`
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BankClientConfig {
    /// Base URL of the bank's member API
    url: String,

    /// Bank-backed marker denom tracked in the coin movement ledger
    denom: String,

    /// Request timeout in seconds
    request_timeout_s: u64,
}

impl BankClientConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        dotenv().ok();

        let url = required("BANK_URL")?;
        let denom = required("BANK_DENOM")?;
        let request_timeout_s = optional("BANK_REQUEST_TIMEOUT_S", 30u64)?;

        info!(%url, %denom, "Loaded bank client config:");

        Ok(BankClientConfig {
            url,
            denom,
            request_timeout_s,
        })
    }

    /// Getter for `url`
    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Getter for `denom`
    pub(crate) fn denom(&self) -> &str {
        &self.denom
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

/// Sizing of the background work queues
#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    num_workers: usize,
    polling_delay_ms: u64,
    claim_ttl_s: u64,
}

impl WorkerConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        dotenv().ok();

        let num_workers = optional("NUM_WORKERS", DEFAULT_NUM_WORKERS)?;
        let polling_delay_ms = optional("POLLING_DELAY_MS", DEFAULT_POLLING_DELAY_MS)?;
        let claim_ttl_s = optional("CLAIM_TTL_S", DEFAULT_CLAIM_TTL_S)?;

        info!(num_workers, polling_delay_ms, claim_ttl_s, "Loaded worker config:");

        Ok(WorkerConfig {
            num_workers,
            polling_delay_ms,
            claim_ttl_s,
        })
    }

    /// Getter for `num_workers`
    pub(crate) fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub(crate) fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    pub(crate) fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_s)
    }
}
