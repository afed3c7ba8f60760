//! C2: issues payment invoices and tracks their settlement state.
//!
//! A single supervised background task owns the payment node's streaming
//! subscription and is the sole writer to the in-memory invoice-state
//! map; all other tasks only read it. Settlement verification therefore
//! never performs network I/O.

use crate::payment_node::{InvoiceState, PaymentHash, PaymentNode, PaymentNodeError};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::timeout;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ChallengerError {
    #[error("payment node unavailable: {0}")]
    Unavailable(#[from] PaymentNodeError),
    #[error("invoice creation timed out")]
    Timeout,
}

/// The settlement state a caller observes for a given payment hash.
/// Distinct from [`InvoiceState`]: `Unknown` covers hashes the in-memory
/// map has never seen, which can legitimately happen while disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Open,
    Settled,
    Canceled,
    Unknown,
}

impl From<InvoiceState> for InvoiceStatus {
    fn from(state: InvoiceState) -> Self {
        match state {
            InvoiceState::Open => InvoiceStatus::Open,
            InvoiceState::Settled => InvoiceStatus::Settled,
            InvoiceState::Canceled => InvoiceStatus::Canceled,
        }
    }
}

/// Tracks invoice settlement by subscribing to a [`PaymentNode`]. Cheap
/// to clone: the map and health timestamp are both `Arc`-shared.
pub struct Challenger<P: PaymentNode> {
    node: Arc<P>,
    state: Arc<DashMap<[u8; 32], InvoiceState>>,
    // 0 means healthy/connected; otherwise unix seconds the disconnect began.
    disconnected_since: Arc<AtomicU64>,
    unhealthy_threshold: Duration,
    challenge_timeout: Duration,
}

impl<P: PaymentNode + 'static> Challenger<P> {
    pub fn new(node: Arc<P>, unhealthy_threshold: Duration, challenge_timeout: Duration) -> Self {
        Self {
            node,
            state: Arc::new(DashMap::new()),
            disconnected_since: Arc::new(AtomicU64::new(0)),
            unhealthy_threshold,
            challenge_timeout,
        }
    }

    /// Spawns the supervised subscription loop. Call once at startup.
    pub fn spawn_subscription(&self) -> tokio::task::JoinHandle<()> {
        let node = self.node.clone();
        let state = self.state.clone();
        let disconnected_since = self.disconnected_since.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match run_subscription_once(&*node, &state, &disconnected_since).await {
                    Ok(()) => {
                        // Subscription ended cleanly (e.g. shutdown); don't reconnect.
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "payment node subscription dropped, reconnecting");
                        let now = unix_now();
                        disconnected_since.compare_exchange(
                            0,
                            now,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        ).ok();
                        let backoff = backoff_delay(attempt);
                        attempt = attempt.saturating_add(1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        })
    }

    /// Requests a new invoice from the payment node, bounded by
    /// `challenge_timeout`.
    pub async fn new_challenge(
        &self,
        price_msat: u64,
    ) -> Result<(String, PaymentHash), ChallengerError> {
        let invoice = timeout(
            self.challenge_timeout,
            self.node.create_invoice(price_msat, "lsat-proxy"),
        )
        .await
        .map_err(|_| ChallengerError::Timeout)??;
        // Not inserted here: the subscription loop is the map's sole
        // writer. Until it observes this invoice, `verify_invoice_status`
        // reports `Unknown`, which the minter treats the same as `Open`
        // (both mean "not yet settled").
        Ok((invoice.payment_request, invoice.payment_hash))
    }

    /// Reads the cached settlement state. Never performs I/O.
    pub fn verify_invoice_status(&self, payment_hash: PaymentHash) -> InvoiceStatus {
        self.state
            .get(&payment_hash.0)
            .map(|entry| (*entry).into())
            .unwrap_or(InvoiceStatus::Unknown)
    }

    /// True once disconnect has persisted beyond `unhealthy_threshold`.
    /// Paid-token validation keeps working even when unhealthy, since it
    /// only reads the cache; this flag gates challenge-producing paths.
    pub fn is_healthy(&self) -> bool {
        let since = self.disconnected_since.load(Ordering::SeqCst);
        if since == 0 {
            return true;
        }
        let elapsed = unix_now().saturating_sub(since);
        elapsed < self.unhealthy_threshold.as_secs()
    }
}

async fn run_subscription_once<P: PaymentNode>(
    node: &P,
    state: &DashMap<[u8; 32], InvoiceState>,
    disconnected_since: &AtomicU64,
) -> Result<(), PaymentNodeError> {
    let open_invoices = node.list_open_invoices().await?;
    let mut updates = node.subscribe_invoice_updates().await?;
    // Both calls above succeeded: connectivity is restored.
    mark_connected(disconnected_since);
    for invoice in open_invoices {
        state.insert(invoice.payment_hash.0, invoice.state);
    }
    while let Some(update) = updates.recv().await {
        state.insert(update.payment_hash.0, update.state);
    }
    Err(PaymentNodeError::Unreachable(
        "subscription channel closed".to_string(),
    ))
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(BACKOFF_CAP);
    let jitter_frac = rand::rng().random_range(-0.2..=0.2);
    let jittered_secs = capped.as_secs_f64() * (1.0 + jitter_frac);
    Duration::from_secs_f64(jittered_secs.max(0.0))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Marks the subscription healthy again; used by the supervision loop
/// once a reconnect succeeds and by tests.
fn mark_connected(disconnected_since: &AtomicU64) {
    disconnected_since.store(0, Ordering::SeqCst);
}
