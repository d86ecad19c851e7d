//! In-process doubles for the bridge and the storage backend, shared by unit tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{Chain, Wei};
use crate::session::backend::{StorageBackend, StorageSession, StoredObject, UploadMetadata};
use crate::settlement::bridge::{
    BridgeClient, FeeEstimate, FulfillmentReceipt, FulfillmentSource, IntentParams, IntentStatus,
    TransferRequest,
};
use crate::settlement::routes::Route;

// ========== BRIDGE ==========

/// Scripted bridge. Call counters start at 1; `executed_from(3)` means the third status
/// read is the first to report execution.
pub struct MockBridge {
    executed_from: u32,
    fulfilled_from: u32,
    failing_status_until: u32,
    failing_submit: bool,
    amount_out: Wei,
    status_calls: AtomicU32,
    fulfillment_calls: AtomicU32,
    submit_calls: AtomicU32,
    fee_calls: AtomicU32,
    last_request: Mutex<Option<TransferRequest>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            executed_from: u32::MAX,
            fulfilled_from: u32::MAX,
            failing_status_until: 0,
            failing_submit: false,
            amount_out: Wei::from(1_000u64),
            status_calls: AtomicU32::new(0),
            fulfillment_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            fee_calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn executed_from(mut self, call: u32) -> Self {
        self.executed_from = call;
        self
    }

    pub fn fulfilled_from(mut self, call: u32) -> Self {
        self.fulfilled_from = call;
        self
    }

    /// Status reads 1..=call fail
    pub fn failing_status_until(mut self, call: u32) -> Self {
        self.failing_status_until = call;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.failing_submit = true;
        self
    }

    pub fn with_amount_out(mut self, amount: Wei) -> Self {
        self.amount_out = amount;
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn fee_calls(&self) -> u32 {
        self.fee_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<TransferRequest> {
        self.last_request.lock().clone()
    }

    fn params(&self, request_id: &str) -> IntentParams {
        let request = self.last_request.lock().clone();
        IntentParams {
            request_id: request_id.to_string(),
            source_chain: request
                .as_ref()
                .map(|r| r.source_chain)
                .unwrap_or(Chain::Base),
            destination_chain: Chain::Filecoin,
            token_symbol: "USDFC".to_string(),
            amount_in: request.as_ref().map(|r| r.amount).unwrap_or(self.amount_out),
            amount_out: self.amount_out,
            solver_fee: Wei::from(10u64),
            recipient: "0xrecipient".to_string(),
            submitted_at: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl BridgeClient for MockBridge {
    async fn estimate_fees(&self, _route: &Route, amount: Wei) -> AppResult<FeeEstimate> {
        self.fee_calls.fetch_add(1, Ordering::SeqCst);
        let solver_fee = Wei::from(10u64);
        let network_fee = Wei::from(5u64);
        let total_fee = Wei::from(15u64);
        Ok(FeeEstimate {
            solver_fee,
            network_fee,
            total_fee,
            transfer_amount: amount,
            approval_amount: amount
                .checked_add(total_fee)
                .ok_or_else(|| AppError::InvalidInput("overflow".to_string()))?,
        })
    }

    async fn submit(&self, request: &TransferRequest) -> AppResult<String> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_submit {
            return Err(AppError::ExternalError("bridge rejected request".to_string()));
        }
        *self.last_request.lock() = Some(request.clone());
        Ok(format!("req-{}", n))
    }

    async fn fetch_status(&self, request_id: &str) -> AppResult<IntentStatus> {
        let n = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failing_status_until {
            return Err(AppError::ExternalError(format!("status read {} failed", n)));
        }
        Ok(IntentStatus {
            executed: n >= self.executed_from,
            params: Some(self.params(request_id)),
        })
    }

    async fn fetch_fulfillment(&self, _request_id: &str) -> AppResult<FulfillmentReceipt> {
        let n = self.fulfillment_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fulfilled = n >= self.fulfilled_from;
        Ok(FulfillmentReceipt {
            fulfilled,
            amount_out: fulfilled.then_some(self.amount_out),
            solver: fulfilled.then(|| "0xsolver".to_string()),
            transaction_hash: fulfilled.then(|| "0xfeed".to_string()),
            fulfilled_at: fulfilled.then(Utc::now),
        })
    }
}

pub struct StaticFulfillmentSource {
    fulfilled: bool,
}

impl StaticFulfillmentSource {
    pub fn fulfilled() -> Self {
        Self { fulfilled: true }
    }

    pub fn pending() -> Self {
        Self { fulfilled: false }
    }
}

#[async_trait]
impl FulfillmentSource for StaticFulfillmentSource {
    fn name(&self) -> &'static str {
        "static source"
    }

    async fn is_fulfilled(&self, _request_id: &str) -> AppResult<bool> {
        Ok(self.fulfilled)
    }
}

// ========== STORAGE ==========

#[derive(Default)]
struct StorageState {
    connect_failures: u32,
    connect_delay: Duration,
    upload_failures: u32,
    upload_delay: Duration,
    refusing: AtomicBool,
    connect_attempts: AtomicU32,
    upload_calls: AtomicU32,
    // Flags only, so the backend never holds a strong reference to a session
    sessions: Mutex<Vec<Arc<SessionFlags>>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

struct SessionFlags {
    alive: AtomicBool,
    closed: AtomicBool,
}

/// Storage backend double. Sessions are numbered `session-1`, `session-2`, ...
/// `with_connect_failures(u32::MAX)` never connects.
pub struct MockStorageBackend {
    state: Arc<StorageState>,
}

impl MockStorageBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StorageState::default()),
        }
    }

    fn configure(self, apply: impl FnOnce(&mut StorageState)) -> Self {
        let mut state = Arc::try_unwrap(self.state).unwrap_or_else(|_| {
            panic!("MockStorageBackend must be configured before use")
        });
        apply(&mut state);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn with_connect_failures(self, failures: u32) -> Self {
        self.configure(|s| s.connect_failures = failures)
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.configure(|s| s.connect_delay = delay)
    }

    /// The first `failures` uploads fail, whichever session they run on
    pub fn with_upload_failures(self, failures: u32) -> Self {
        self.configure(|s| s.upload_failures = failures)
    }

    /// Uploads take this long; closing the session meanwhile makes them fail
    pub fn with_upload_delay(self, delay: Duration) -> Self {
        self.configure(|s| s.upload_delay = delay)
    }

    /// From now on every connect attempt fails
    pub fn refuse_connections(&self) {
        self.state.refusing.store(true, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions.lock().len()
    }

    pub fn upload_calls(&self) -> u32 {
        self.state.upload_calls.load(Ordering::SeqCst)
    }

    /// Every session opened so far stops answering
    pub fn kill_sessions(&self) {
        for session in self.state.sessions.lock().iter() {
            session.alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn session_closed(&self, index: usize) -> bool {
        self.state
            .sessions
            .lock()
            .get(index)
            .map(|s| s.closed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl StorageBackend for MockStorageBackend {
    async fn connect(&self) -> AppResult<Arc<dyn StorageSession>> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.state.connect_delay.is_zero() {
            tokio::time::sleep(self.state.connect_delay).await;
        }
        if attempt <= self.state.connect_failures || self.state.refusing.load(Ordering::SeqCst) {
            return Err(AppError::ExternalError(format!(
                "connection refused (attempt {})",
                attempt
            )));
        }

        let flags = Arc::new(SessionFlags {
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        let mut sessions = self.state.sessions.lock();
        sessions.push(flags.clone());
        Ok(Arc::new(MockSession {
            id: format!("session-{}", sessions.len()),
            flags,
            state: self.state.clone(),
        }))
    }
}

pub struct MockSession {
    id: String,
    flags: Arc<SessionFlags>,
    state: Arc<StorageState>,
}

impl MockSession {
    fn ensure_alive(&self) -> AppResult<()> {
        if self.flags.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::ExternalError(format!("{} is gone", self.id)))
        }
    }
}

#[async_trait]
impl StorageSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upload(&self, bytes: &[u8], _metadata: &UploadMetadata) -> AppResult<StoredObject> {
        let call = self.state.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.ensure_alive()?;
        if !self.state.upload_delay.is_zero() {
            tokio::time::sleep(self.state.upload_delay).await;
            if self.flags.closed.load(Ordering::SeqCst) {
                return Err(AppError::ExternalError(format!(
                    "{} closed mid-upload",
                    self.id
                )));
            }
        }
        if call <= self.state.upload_failures {
            return Err(AppError::ExternalError(format!(
                "upload interrupted on {}",
                self.id
            )));
        }

        let digest = hex::encode(Sha256::digest(bytes));
        let content_address = format!("bafy{}", &digest[..32]);
        self.state
            .objects
            .lock()
            .insert(content_address.clone(), bytes.to_vec());
        Ok(StoredObject {
            content_address,
            provider_id: "mock-provider".to_string(),
        })
    }

    async fn download(&self, content_address: &str) -> AppResult<Vec<u8>> {
        self.ensure_alive()?;
        self.state
            .objects
            .lock()
            .get(content_address)
            .cloned()
            .ok_or_else(|| AppError::NotFound(content_address.to_string()))
    }

    async fn is_alive(&self) -> AppResult<bool> {
        Ok(self.flags.alive.load(Ordering::SeqCst))
    }

    async fn close(&self) -> AppResult<()> {
        self.flags.closed.store(true, Ordering::SeqCst);
        self.flags.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}
