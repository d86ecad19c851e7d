use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::{Config, LedgerBackend},
    error::{AppError, AppResult},
    funding::{FundingReceipt, FundingService},
    ledger::{
        models::{Chain, TransactionRecord, Wei},
        Ledger, LedgerStore, MemoryLedgerStore, PgLedgerStore,
    },
    session::{
        ConnectionManager, HttpStorageBackend, SessionDiagnostics, StorageBackend,
    },
    settlement::{
        BridgeClient, FulfillmentSource, HttpBridgeClient, HttpFulfillmentSource, PollOptions,
        RouteTable, SettlementOrchestrator,
    },
    storage::{
        MemoryUploadStore, PgUploadStore, UploadOutcome, UploadRecord, UploadService, UploadStore,
    },
};

/// Everything the outer layer talks to
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub funding: Arc<FundingService>,
    pub uploads: Arc<UploadService>,
    pub connections: Arc<ConnectionManager>,
}

/// Health snapshot for external reporting
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub session: SessionDiagnostics,
    pub routes: usize,
}

/// External dependencies, swappable for tests
pub struct Components {
    pub ledger_store: Arc<dyn LedgerStore>,
    pub upload_store: Arc<dyn UploadStore>,
    pub bridge: Arc<dyn BridgeClient>,
    pub secondary: Option<Arc<dyn FulfillmentSource>>,
    pub storage: Arc<dyn StorageBackend>,
}

impl AppState {
    // ========== FACADE ==========

    pub async fn fund_account(
        &self,
        address: &str,
        amount: Wei,
        source_chain: Chain,
        token: &str,
    ) -> AppResult<FundingReceipt> {
        self.funding
            .fund_account(address, amount, source_chain, token)
            .await
    }

    pub async fn resume_funding(
        &self,
        request_id: &str,
        address: &str,
        expected_amount: Wei,
    ) -> AppResult<FundingReceipt> {
        self.funding.resume(request_id, address, expected_amount).await
    }

    pub async fn reserve_and_store(
        &self,
        address: &str,
        bytes: &[u8],
        file_name: &str,
        duration_days: u32,
    ) -> AppResult<UploadOutcome> {
        self.uploads
            .reserve_and_store(address, bytes, file_name, duration_days)
            .await
    }

    pub async fn retrieve(&self, file_id: Uuid) -> AppResult<(UploadRecord, Vec<u8>)> {
        self.uploads.retrieve(file_id).await
    }

    pub async fn list_uploads(&self, owner: &str) -> AppResult<Vec<UploadRecord>> {
        self.uploads.list_uploads(owner, None).await
    }

    pub async fn get_balance(&self, address: &str) -> AppResult<Wei> {
        self.ledger.get_balance(address).await
    }

    pub async fn get_history(
        &self,
        address: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<TransactionRecord>> {
        self.ledger.history(address, limit).await
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            session: self.connections.diagnostics(),
            routes: self.orchestrator.routes().len(),
        }
    }

    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
    }
}

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let (ledger_store, upload_store): (Arc<dyn LedgerStore>, Arc<dyn UploadStore>) =
        match config.database.backend {
            LedgerBackend::Postgres => {
                let url = config.database.url.as_deref().ok_or_else(|| {
                    AppError::Config("database.url must be set".to_string())
                })?;
                let pool = initialize_database(url, config.database.max_connections).await?;
                (
                    Arc::new(PgLedgerStore::new(pool.clone())),
                    Arc::new(PgUploadStore::new(pool)),
                )
            }
            LedgerBackend::Memory => {
                warn!("⚠️  In-memory ledger selected - balances are lost on restart and NOT shared across instances");
                (
                    Arc::new(MemoryLedgerStore::new()),
                    Arc::new(MemoryUploadStore::new()),
                )
            }
        };

    let bridge_timeout = Duration::from_millis(config.bridge.request_timeout_ms);
    let bridge = Arc::new(HttpBridgeClient::new(config.bridge.url.clone(), bridge_timeout)?);
    info!("✅ Bridge client configured for {}", config.bridge.url);

    let secondary: Option<Arc<dyn FulfillmentSource>> = match &config.bridge.secondary_url {
        Some(url) => {
            info!("✅ Destination fulfillment source configured for {}", url);
            Some(Arc::new(HttpFulfillmentSource::new(url.clone(), bridge_timeout)?))
        }
        None => None,
    };

    let storage = Arc::new(HttpStorageBackend::new(
        config.session.storage_url.clone(),
        config.session.api_key.clone(),
        Duration::from_millis(config.session.request_timeout_ms),
    )?);

    build_app_state(
        config,
        Components {
            ledger_store,
            upload_store,
            bridge,
            secondary,
            storage,
        },
    )
    .await
}

/// Wire services together and open the storage session
pub async fn build_app_state(config: &Config, components: Components) -> AppResult<AppState> {
    let ledger = Arc::new(Ledger::new(components.ledger_store));

    let routes = RouteTable::new(config.bridge.routes.iter().cloned());
    info!("🛣️  {} bridge route(s) enabled", routes.len());
    let orchestrator = Arc::new(SettlementOrchestrator::new(components.bridge, routes));

    let mut poll_options = PollOptions::default()
        .with_timeout(Duration::from_millis(config.settlement.poll_timeout_ms))
        .with_interval(Duration::from_millis(config.settlement.poll_interval_ms));
    if let Some(secondary) = components.secondary {
        poll_options = poll_options.with_secondary(secondary);
    }

    let funding = Arc::new(FundingService::new(
        orchestrator.clone(),
        ledger.clone(),
        config.settlement.destination_chain,
        config.settlement.recipient.clone(),
        poll_options,
    ));

    info!("🔌 Connecting to storage backend...");
    let connections = Arc::new(ConnectionManager::new(
        components.storage,
        config.session.settings(),
    ));
    connections.initialize().await?;

    let uploads = Arc::new(UploadService::new(
        ledger.clone(),
        components.upload_store,
        connections.clone(),
        Arc::new(config.pricing.model()),
        config.uploads.refund_policy,
        config.uploads.max_file_size,
    ));

    info!("✅ Application state initialized");
    Ok(AppState {
        ledger,
        orchestrator,
        funding,
        uploads,
        connections,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
