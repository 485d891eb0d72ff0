//! Application entry point.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use asset_pool_relayer::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use asset_pool_relayer::app::{
    AppState, RetryPolicy, SchedulerConfig, TransactionScheduler, spawn_scheduler,
};
use asset_pool_relayer::infra::{
    AssetPoolClient, ChainGasOracle, ContractProvider, NetworkConfig, PostgresConfig,
    PostgresStore, TransactionConfig, TransactionService,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    networks: Vec<NetworkConfig>,
    scheduler_config: SchedulerConfig,
    transaction_config: TransactionConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let enable_rate_limiting = env::var("ENABLE_RATE_LIMITING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let rate_limit_config = RateLimitConfig::from_env();

        let networks = Self::load_networks()?;

        let enable_scheduler = env::var("ENABLE_SCHEDULER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        let interval_secs = env::var("SCHEDULER_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        let batch_size = env::var("SCHEDULER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(50);
        // Attempts are unlimited unless explicitly capped
        let retry_policy = match env::var("SCHEDULER_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            Some(max) => RetryPolicy::limited(max),
            None => RetryPolicy::unlimited(),
        };
        let max_fee_per_gas = env::var("MAX_FEE_PER_GAS")
            .ok()
            .and_then(|v| v.parse::<u128>().ok())
            .unwrap_or(250_000_000_000);

        let scheduler_config = SchedulerConfig {
            interval: Duration::from_secs(interval_secs),
            batch_size,
            max_fee_per_gas,
            retry_policy,
            enabled: enable_scheduler,
        };

        let receipt_timeout_secs = env::var("RECEIPT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(120);
        let transaction_config = TransactionConfig {
            max_fee_per_gas,
            receipt_timeout: Duration::from_secs(receipt_timeout_secs),
            ..Default::default()
        };

        Ok(Self {
            database_url,
            host,
            port,
            enable_rate_limiting,
            rate_limit_config,
            networks,
            scheduler_config,
            transaction_config,
        })
    }

    /// Networks come from `NETWORKS` (comma-separated chain ids), with
    /// `NETWORK_<id>_RPC_URL` / `NETWORK_<id>_PRIVATE_KEY` /
    /// `NETWORK_<id>_GAS_ORACLE_URL` per entry.
    fn load_networks() -> Result<Vec<NetworkConfig>> {
        let ids = env::var("NETWORKS").context("NETWORKS not set")?;
        let mut networks = Vec::new();

        for raw in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let chain_id: u64 = raw
                .parse()
                .with_context(|| format!("NETWORKS entry '{raw}' is not a chain id"))?;

            let rpc_url = env::var(format!("NETWORK_{chain_id}_RPC_URL"))
                .with_context(|| format!("NETWORK_{chain_id}_RPC_URL not set"))?;
            let key = env::var(format!("NETWORK_{chain_id}_PRIVATE_KEY"))
                .with_context(|| format!("NETWORK_{chain_id}_PRIVATE_KEY not set"))?;
            if key.is_empty() {
                anyhow::bail!("NETWORK_{chain_id}_PRIVATE_KEY is empty");
            }
            let gas_oracle_url = env::var(format!("NETWORK_{chain_id}_GAS_ORACLE_URL"))
                .ok()
                .filter(|u| !u.is_empty());

            networks.push(NetworkConfig {
                chain_id,
                rpc_url,
                private_key: SecretString::from(key),
                gas_oracle_url,
            });
        }

        if networks.is_empty() {
            anyhow::bail!("NETWORKS contains no chain ids");
        }
        Ok(networks)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Asset Pool Relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("Initializing infrastructure...");

    let store = PostgresStore::new(&config.database_url, PostgresConfig::default()).await?;
    store.run_migrations().await?;
    let store = Arc::new(store);
    info!("   Database connected and migrations applied");

    let provider = Arc::new(ContractProvider::connect(&config.networks).await?);
    info!("   {} network(s) connected", config.networks.len());

    let gas_endpoints: HashMap<u64, String> = config
        .networks
        .iter()
        .filter_map(|n| n.gas_oracle_url.clone().map(|url| (n.chain_id, url)))
        .collect();
    let gas_oracle = Arc::new(ChainGasOracle::new(Arc::clone(&provider), gas_endpoints));

    let transactions = Arc::new(TransactionService::new(
        Arc::clone(&provider),
        store.clone() as _,
        gas_oracle.clone() as _,
        config.transaction_config.clone(),
    ));
    let pool_client = Arc::new(AssetPoolClient::new(
        Arc::clone(&provider),
        Arc::clone(&transactions),
    ));

    let app_state = AppState::new(store.clone() as _, pool_client as _);

    let scheduler_shutdown = if config.scheduler_config.enabled {
        let scheduler = Arc::new(TransactionScheduler::new(
            store as _,
            Arc::clone(&app_state.withdrawals),
            gas_oracle as _,
            config.scheduler_config.clone(),
        ));
        let (_join_handle, handle) = spawn_scheduler(scheduler);
        info!(
            "   Queue scheduler started (interval: {:?}, batch: {})",
            config.scheduler_config.interval, config.scheduler_config.batch_size
        );
        Some(handle)
    } else {
        info!("   Queue scheduler disabled");
        None
    };

    let app_state = match scheduler_shutdown.clone() {
        Some(handle) => app_state.with_scheduler(handle),
        None => app_state,
    };
    let app_state = Arc::new(app_state);

    let router = if config.enable_rate_limiting {
        info!("   Rate limiting enabled");
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler_shutdown {
        handle.shutdown();
    }

    info!("Server shutdown complete");
    Ok(())
}
