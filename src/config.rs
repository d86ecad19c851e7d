use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{Chain, Wei};
use crate::session::SessionSettings;
use crate::settlement::Route;
use crate::storage::{LinearPricing, RefundPolicy};

const CONFIG_FILE: &str = "crossfund";
const ENV_PREFIX: &str = "CROSSFUND";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: LedgerBackend,
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Postgres,
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub url: String,
    /// Destination-chain indexer consulted alongside the bridge, if any
    pub secondary_url: Option<String>,
    pub request_timeout_ms: u64,
    pub routes: Vec<Route>,
}

fn default_routes() -> Vec<Route> {
    [
        Chain::Base,
        Chain::Avalanche,
        Chain::Optimism,
        Chain::Arbitrum,
        Chain::Ethereum,
    ]
    .into_iter()
    .map(|source_chain| Route {
        source_chain,
        destination_chain: Chain::Filecoin,
        token_symbol: "USDFC".to_string(),
    })
    .collect()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secondary_url: None,
            request_timeout_ms: 15_000,
            routes: default_routes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub destination_chain: Chain,
    /// Platform wallet receiving funded transfers
    pub recipient: String,
    pub poll_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            destination_chain: Chain::Filecoin,
            recipient: String::new(),
            poll_timeout_ms: 300_000,
            poll_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub storage_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_session_age_ms: u64,
    pub connect_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_url: String::new(),
            api_key: None,
            request_timeout_ms: 60_000,
            heartbeat_interval_ms: 45_000,
            max_session_age_ms: 60_000,
            connect_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_session_age: Duration::from_millis(self.max_session_age_ms),
            connect_attempts: self.connect_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PricingConfig {
    pub wei_per_byte_day: Wei,
    pub minimum_charge_wei: Wei,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            wei_per_byte_day: Wei::from(1_000u64),
            minimum_charge_wei: Wei::from(1_000_000_000_000u64),
        }
    }
}

impl PricingConfig {
    pub fn model(&self) -> LinearPricing {
        LinearPricing {
            wei_per_byte_day: self.wei_per_byte_day,
            minimum_charge: self.minimum_charge_wei,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadsConfig {
    pub refund_policy: RefundPolicy,
    pub max_file_size: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            refund_policy: RefundPolicy::Compensate,
            max_file_size: 200 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub bridge: BridgeConfig,
    pub settlement: SettlementConfig,
    pub session: SessionConfig,
    pub pricing: PricingConfig,
    pub uploads: UploadsConfig,
}

impl Config {
    /// Defaults, then `crossfund.toml` if present, then `CROSSFUND__SECTION__KEY` variables.
    /// `DATABASE_URL` is honored when no database url is configured.
    pub fn load() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let mut config: Config = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if config.database.url.is_none() {
            config.database.url = std::env::var("DATABASE_URL").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let missing = |what: &str| AppError::Config(format!("{} must be set", what));

        if self.database.backend == LedgerBackend::Postgres
            && self.database.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(missing("database.url (or DATABASE_URL)"));
        }
        if self.bridge.url.trim().is_empty() {
            return Err(missing("bridge.url"));
        }
        if self.session.storage_url.trim().is_empty() {
            return Err(missing("session.storage_url"));
        }
        if self.settlement.recipient.trim().is_empty() {
            return Err(missing("settlement.recipient"));
        }
        if self.bridge.routes.is_empty() {
            return Err(AppError::Config("bridge.routes is empty".to_string()));
        }
        if let Some(route) = self
            .bridge
            .routes
            .iter()
            .find(|r| r.destination_chain != self.settlement.destination_chain)
        {
            return Err(AppError::Config(format!(
                "route {} -> {} does not end on {}",
                route.source_chain, route.destination_chain, self.settlement.destination_chain
            )));
        }

        let intervals = [
            ("settlement.poll_timeout_ms", self.settlement.poll_timeout_ms),
            ("settlement.poll_interval_ms", self.settlement.poll_interval_ms),
            ("session.heartbeat_interval_ms", self.session.heartbeat_interval_ms),
            ("session.max_session_age_ms", self.session.max_session_age_ms),
            ("bridge.request_timeout_ms", self.bridge.request_timeout_ms),
            ("session.request_timeout_ms", self.session.request_timeout_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{} must be greater than zero", name)));
        }
        if self.session.connect_attempts == 0 {
            return Err(AppError::Config(
                "session.connect_attempts must be greater than zero".to_string(),
            ));
        }
        if self.pricing.wei_per_byte_day.is_zero() && self.pricing.minimum_charge_wei.is_zero() {
            return Err(AppError::Config("pricing would make storage free".to_string()));
        }
        Ok(())
    }
}
