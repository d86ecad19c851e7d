use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::bridge::{
    BridgeClient, FeeEstimate, FulfillmentReceipt, FulfillmentSource, IntentParams, IntentStatus,
    TransferRequest,
};
use super::routes::RouteTable;
use super::signal::{Observation, Signal};
use crate::error::{AppError, AppResult, SettlementError};
use crate::ledger::models::{Chain, Wei};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Progress snapshot emitted once per poll tick
#[derive(Debug, Clone, Serialize)]
pub struct PollProgress {
    pub request_id: String,
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub executed: Option<bool>,
    pub fulfilled: Option<bool>,
    pub destination_fulfilled: Option<bool>,
}

pub type ProgressCallback = Arc<dyn Fn(&PollProgress) + Send + Sync>;

/// Tunables for `poll_until_resolved`
#[derive(Clone)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
    pub on_progress: Option<ProgressCallback>,
    pub secondary: Option<Arc<dyn FulfillmentSource>>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            on_progress: None,
            secondary: None,
        }
    }
}

impl PollOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_secondary(mut self, source: Arc<dyn FulfillmentSource>) -> Self {
        self.secondary = Some(source);
        self
    }
}

/// Outcome of a successfully resolved intent
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSettlement {
    pub request_id: String,
    pub signal: Signal,
    pub params: Option<IntentParams>,
    pub fulfillment: Option<FulfillmentReceipt>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl ResolvedSettlement {
    /// Amount delivered on the destination chain, as reported by the receipt or intent
    pub fn delivered_amount(&self) -> Option<Wei> {
        self.fulfillment
            .as_ref()
            .and_then(|f| f.amount_out)
            .or_else(|| self.params.as_ref().map(|p| p.amount_out))
            .filter(|amount| !amount.is_zero())
    }
}

/// Everything read during one tick
struct Tick {
    status: AppResult<IntentStatus>,
    fulfillment: AppResult<FulfillmentReceipt>,
    destination: Option<AppResult<bool>>,
}

impl Tick {
    fn observation(&self) -> Observation {
        Observation {
            executed: self.status.as_ref().ok().map(|s| s.executed),
            fulfilled: self.fulfillment.as_ref().ok().map(|f| f.fulfilled),
            destination_fulfilled: match &self.destination {
                Some(Ok(fulfilled)) => Some(*fulfilled),
                _ => None,
            },
        }
    }
}

/// Drives a cross-chain intent from submission to a single resolved answer
pub struct SettlementOrchestrator {
    bridge: Arc<dyn BridgeClient>,
    routes: RouteTable,
}

impl SettlementOrchestrator {
    pub fn new(bridge: Arc<dyn BridgeClient>, routes: RouteTable) -> Self {
        Self { bridge, routes }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    // ========== FEES & SUBMISSION ==========

    /// Live fee quote for a transfer. No caching, no retry.
    #[instrument(skip(self, amount), fields(amount = %amount))]
    pub async fn estimate_fees(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
        token: &str,
        amount: Wei,
    ) -> AppResult<FeeEstimate> {
        let route = self.routes.resolve(source_chain, destination_chain, token)?;
        if amount.is_zero() {
            return Err(AppError::InvalidInput("Transfer amount must be positive".to_string()));
        }

        let estimate = self
            .bridge
            .estimate_fees(&route, amount)
            .await
            .map_err(|e| match e {
                AppError::Settlement(inner) => AppError::Settlement(inner),
                other => SettlementError::FeeEstimationFailed(other.to_string()).into(),
            })?;

        debug!(
            "Fee estimate {} -> {} {}: solver {}, network {}, total {}",
            source_chain,
            destination_chain,
            token,
            estimate.solver_fee,
            estimate.network_fee,
            estimate.total_fee
        );
        Ok(estimate)
    }

    /// Submit one intent. Exactly one bridge write; never retried here because a
    /// resubmission would move funds twice.
    #[instrument(skip(self, amount, solver_fee), fields(amount = %amount))]
    pub async fn submit(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
        token: &str,
        amount: Wei,
        recipient: &str,
        solver_fee: Wei,
    ) -> AppResult<String> {
        let route = self.routes.resolve(source_chain, destination_chain, token)?;
        if amount.is_zero() {
            return Err(AppError::InvalidInput("Transfer amount must be positive".to_string()));
        }
        if recipient.trim().is_empty() {
            return Err(AppError::InvalidAddress("recipient is empty".to_string()));
        }

        let request = TransferRequest {
            source_chain: route.source_chain,
            destination_chain: route.destination_chain,
            token_symbol: route.token_symbol,
            amount,
            recipient: recipient.to_string(),
            solver_fee,
        };

        let request_id = self.bridge.submit(&request).await.map_err(|e| {
            error!("❌ Settlement submission failed: {}", e);
            AppError::from(SettlementError::SubmissionFailed(e.to_string()))
        })?;

        info!(
            "📤 Submitted settlement {} ({} {} from {} to {})",
            request_id, amount, request.token_symbol, source_chain, destination_chain
        );
        Ok(request_id)
    }

    // ========== POLLING ==========

    async fn observe(
        &self,
        request_id: &str,
        secondary: Option<&Arc<dyn FulfillmentSource>>,
    ) -> Tick {
        let destination = async {
            match secondary {
                Some(source) => Some(source.is_fulfilled(request_id).await),
                None => None,
            }
        };

        let (status, fulfillment, destination) = futures::join!(
            self.bridge.fetch_status(request_id),
            self.bridge.fetch_fulfillment(request_id),
            destination,
        );

        Tick {
            status,
            fulfillment,
            destination,
        }
    }

    /// Poll until either completion signal is observed or the deadline passes.
    ///
    /// - the first check is immediate
    /// - status and fulfillment (and the secondary source, if any) are read concurrently
    /// - a read failure is tolerated while more than one interval remains, otherwise it
    ///   propagates
    /// - past the deadline one last status read enriches the `Timeout` error
    #[instrument(skip(self, options), fields(timeout_ms = options.timeout.as_millis() as u64))]
    pub async fn poll_until_resolved(
        &self,
        request_id: &str,
        options: PollOptions,
    ) -> AppResult<ResolvedSettlement> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_params: Option<IntentParams> = None;

        info!("⏳ Polling settlement {}", request_id);

        loop {
            attempt += 1;
            let tick = self.observe(request_id, options.secondary.as_ref()).await;
            let elapsed = started.elapsed();
            let observation = tick.observation();

            if let Some(callback) = &options.on_progress {
                callback(&PollProgress {
                    request_id: request_id.to_string(),
                    attempt,
                    elapsed_ms: elapsed.as_millis() as u64,
                    executed: observation.executed,
                    fulfilled: observation.fulfilled,
                    destination_fulfilled: observation.destination_fulfilled,
                });
            }

            if let (Some(Err(e)), Some(source)) = (&tick.destination, &options.secondary) {
                warn!("⚠️  {} read failed for {}: {}", source.name(), request_id, e);
            }

            let Tick {
                status,
                fulfillment,
                ..
            } = tick;

            if let Ok(IntentStatus {
                params: Some(params),
                ..
            }) = &status
            {
                last_params = Some(params.clone());
            }

            let signal = observation.signal();
            if signal.is_resolved() {
                info!(
                    "✅ Settlement {} resolved via {:?} after {} attempt(s) in {}ms",
                    request_id,
                    signal,
                    attempt,
                    elapsed.as_millis()
                );
                return Ok(ResolvedSettlement {
                    request_id: request_id.to_string(),
                    signal,
                    params: last_params,
                    fulfillment: fulfillment.ok(),
                    attempts: attempt,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }

            let failure = match (status, fulfillment) {
                (Err(e), _) | (_, Err(e)) => Some(e),
                _ => None,
            };
            if let Some(e) = failure {
                let remaining = options.timeout.saturating_sub(elapsed);
                if remaining <= options.interval {
                    error!(
                        "❌ Status read for {} failed with no time left to recover: {}",
                        request_id, e
                    );
                    return Err(SettlementError::StatusUnavailable {
                        request_id: request_id.to_string(),
                        message: e.to_string(),
                    }
                    .into());
                }
                warn!(
                    "⚠️  Transient status read failure for {} (attempt {}): {}",
                    request_id, attempt, e
                );
            }

            if elapsed >= options.timeout {
                let last_executed = self
                    .bridge
                    .fetch_status(request_id)
                    .await
                    .ok()
                    .map(|s| s.executed);
                error!(
                    "⏰ Settlement {} timed out after {}ms (executed: {:?})",
                    request_id,
                    elapsed.as_millis(),
                    last_executed
                );
                return Err(SettlementError::Timeout {
                    request_id: request_id.to_string(),
                    elapsed_ms: elapsed.as_millis() as u64,
                    last_executed,
                }
                .into());
            }

            let remaining = options.timeout - elapsed;
            tokio::time::sleep(options.interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::routes::Route;
    use crate::testing::{MockBridge, StaticFulfillmentSource};
    use parking_lot::Mutex;

    fn routes() -> RouteTable {
        RouteTable::new(vec![Route {
            source_chain: Chain::Base,
            destination_chain: Chain::Filecoin,
            token_symbol: "USDFC".to_string(),
        }])
    }

    fn fast() -> PollOptions {
        PollOptions::default()
            .with_timeout(Duration::from_millis(200))
            .with_interval(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_resolves_on_fulfillment_without_execution() {
        let bridge = Arc::new(MockBridge::new().fulfilled_from(1));
        let orchestrator = SettlementOrchestrator::new(bridge.clone(), routes());

        let resolved = orchestrator.poll_until_resolved("r1", fast()).await.unwrap();
        assert_eq!(resolved.signal, Signal::Fulfilled);
        assert_eq!(resolved.attempts, 1);
        assert_eq!(bridge.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolves_on_execution_alone() {
        let bridge = Arc::new(MockBridge::new().executed_from(3));
        let orchestrator = SettlementOrchestrator::new(bridge, routes());

        let resolved = orchestrator.poll_until_resolved("r1", fast()).await.unwrap();
        assert_eq!(resolved.signal, Signal::Executed);
        assert_eq!(resolved.attempts, 3);
        assert!(resolved.params.is_some());
    }

    #[tokio::test]
    async fn test_first_check_is_immediate() {
        let bridge = Arc::new(MockBridge::new().executed_from(1));
        let orchestrator = SettlementOrchestrator::new(bridge, routes());

        let started = std::time::Instant::now();
        let options = PollOptions::default().with_interval(Duration::from_secs(10));
        orchestrator.poll_until_resolved("r1", options).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_timeout_fidelity() {
        let bridge = Arc::new(MockBridge::new());
        let orchestrator = SettlementOrchestrator::new(bridge.clone(), routes());

        let started = std::time::Instant::now();
        let err = orchestrator.poll_until_resolved("r1", fast()).await.unwrap_err();
        let elapsed = started.elapsed();

        match err {
            AppError::Settlement(SettlementError::Timeout {
                request_id,
                last_executed,
                ..
            }) => {
                assert_eq!(request_id, "r1");
                assert_eq!(last_executed, Some(false));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_transient_failure_before_deadline_is_swallowed() {
        let bridge = Arc::new(MockBridge::new().failing_status_until(2).executed_from(3));
        let orchestrator = SettlementOrchestrator::new(bridge, routes());

        let resolved = orchestrator.poll_until_resolved("r1", fast()).await.unwrap();
        assert_eq!(resolved.signal, Signal::Executed);
        assert_eq!(resolved.attempts, 3);
    }

    #[tokio::test]
    async fn test_failure_near_deadline_propagates() {
        let bridge = Arc::new(MockBridge::new().failing_status_until(u32::MAX));
        let orchestrator = SettlementOrchestrator::new(bridge, routes());

        let err = orchestrator.poll_until_resolved("r1", fast()).await.unwrap_err();
        assert!(
            matches!(
                err,
                AppError::Settlement(SettlementError::StatusUnavailable { .. })
            ),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_secondary_source_is_authoritative() {
        let bridge = Arc::new(MockBridge::new());
        let orchestrator = SettlementOrchestrator::new(bridge, routes());

        let options = fast().with_secondary(Arc::new(StaticFulfillmentSource::fulfilled()));
        let resolved = orchestrator.poll_until_resolved("r1", options).await.unwrap();
        assert_eq!(resolved.signal, Signal::FulfilledOnDestination);
    }

    #[tokio::test]
    async fn test_progress_emitted_every_tick() {
        let bridge = Arc::new(MockBridge::new().fulfilled_from(3));
        let orchestrator = SettlementOrchestrator::new(bridge, routes());

        let seen: Arc<Mutex<Vec<PollProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = fast().with_progress(Arc::new(move |p: &PollProgress| {
            sink.lock().push(p.clone())
        }));

        orchestrator.poll_until_resolved("r1", options).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].fulfilled, Some(false));
        assert_eq!(seen[2].fulfilled, Some(true));
        assert_eq!(seen[2].attempt, 3);
    }

    #[tokio::test]
    async fn test_submit_failure_is_not_retried() {
        let bridge = Arc::new(MockBridge::new().failing_submit());
        let orchestrator = SettlementOrchestrator::new(bridge.clone(), routes());

        let err = orchestrator
            .submit(
                Chain::Base,
                Chain::Filecoin,
                "USDFC",
                Wei::from(1_000u64),
                "0xrecipient",
                Wei::from(10u64),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Settlement(SettlementError::SubmissionFailed(_))
        ));
        assert_eq!(bridge.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_route_skips_bridge() {
        let bridge = Arc::new(MockBridge::new());
        let orchestrator = SettlementOrchestrator::new(bridge.clone(), routes());

        let err = orchestrator
            .estimate_fees(Chain::Avalanche, Chain::Filecoin, "USDFC", Wei::from(1u64))
            .await
            .unwrap_err();
        assert!(err.is_routine());
        assert_eq!(bridge.fee_calls(), 0);
    }
}
