//! The capability contract the challenger (C2) depends on.
//!
//! The wire shape of the actual payment node is out of scope; this repo
//! only depends on the three operations below. A real client wiring a
//! Lightning node's gRPC/REST surface behind this trait is left to the
//! deployment, same as the distilled spec's treatment of the
//! payment-node API.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// The SHA-256 payment hash identifying an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub payment_hash: PaymentHash,
    pub payment_request: String,
    pub amount_msat: u64,
    pub state: InvoiceState,
}

#[derive(Debug, Clone)]
pub struct InvoiceUpdate {
    pub payment_hash: PaymentHash,
    pub state: InvoiceState,
}

#[derive(Debug, Error)]
pub enum PaymentNodeError {
    #[error("payment node unreachable: {0}")]
    Unreachable(String),
    #[error("invoice not found")]
    NotFound,
}

/// Capability contract for an external Lightning-style payment node.
pub trait PaymentNode: Send + Sync {
    /// Requests a new invoice for `amount_msat`, tagged with `memo`.
    fn create_invoice(
        &self,
        amount_msat: u64,
        memo: &str,
    ) -> impl Future<Output = Result<Invoice, PaymentNodeError>> + Send;

    /// Opens a streaming subscription of invoice state changes. The
    /// returned receiver is the sole feed the challenger's subscription
    /// loop consumes; reconnect-on-drop policy lives in the challenger,
    /// not here.
    fn subscribe_invoice_updates(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<InvoiceUpdate>, PaymentNodeError>> + Send;

    /// Fetches all currently-open invoices, used by the challenger to
    /// seed its in-memory map on startup/reconnect.
    fn list_open_invoices(
        &self,
    ) -> impl Future<Output = Result<Vec<Invoice>, PaymentNodeError>> + Send;
}

/// In-memory stand-in for a payment node, used in tests and local
/// development. Settlement is driven explicitly via [`StubPaymentNode::settle`]
/// / [`StubPaymentNode::cancel`] rather than real off-chain payment.
#[derive(Default)]
pub struct StubPaymentNode {
    invoices: Mutex<HashMap<[u8; 32], Invoice>>,
    // Test-only: the preimage a real node would only reveal out-of-band
    // upon payment. Kept alongside the invoice so scenario tests can
    // simulate "the client paid and learned the preimage" without a real
    // Lightning round-trip.
    preimages: Mutex<HashMap<[u8; 32], [u8; 32]>>,
    updates: Mutex<Option<mpsc::Sender<InvoiceUpdate>>>,
}

impl StubPaymentNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, update: InvoiceUpdate) {
        if let Some(tx) = self.updates.lock().expect("lock poisoned").as_ref() {
            let _ = tx.try_send(update);
        }
    }

    /// Marks an invoice settled and notifies the subscription channel, as
    /// a real node would after observing payment.
    pub fn settle(&self, payment_hash: PaymentHash) {
        let mut invoices = self.invoices.lock().expect("lock poisoned");
        if let Some(invoice) = invoices.get_mut(&payment_hash.0) {
            invoice.state = InvoiceState::Settled;
        }
        drop(invoices);
        self.notify(InvoiceUpdate {
            payment_hash,
            state: InvoiceState::Settled,
        });
    }

    pub fn cancel(&self, payment_hash: PaymentHash) {
        let mut invoices = self.invoices.lock().expect("lock poisoned");
        if let Some(invoice) = invoices.get_mut(&payment_hash.0) {
            invoice.state = InvoiceState::Canceled;
        }
        drop(invoices);
        self.notify(InvoiceUpdate {
            payment_hash,
            state: InvoiceState::Canceled,
        });
    }

    /// Test-only: returns the preimage backing `payment_hash`, as if it
    /// had just been learned by paying the invoice out-of-band.
    pub fn reveal_preimage(&self, payment_hash: PaymentHash) -> Option<[u8; 32]> {
        self.preimages
            .lock()
            .expect("lock poisoned")
            .get(&payment_hash.0)
            .copied()
    }
}

impl PaymentNode for StubPaymentNode {
    async fn create_invoice(
        &self,
        amount_msat: u64,
        memo: &str,
    ) -> Result<Invoice, PaymentNodeError> {
        use rand::RngCore;
        use sha2::{Digest, Sha256};
        let mut preimage = [0u8; 32];
        rand::rng().fill_bytes(&mut preimage);
        let mut hash_bytes = [0u8; 32];
        hash_bytes.copy_from_slice(&Sha256::digest(preimage));
        let payment_hash = PaymentHash(hash_bytes);
        self.preimages
            .lock()
            .expect("lock poisoned")
            .insert(hash_bytes, preimage);
        let invoice = Invoice {
            payment_hash,
            payment_request: format!("lnbc{amount_msat}_{memo}_{payment_hash}"),
            amount_msat,
            state: InvoiceState::Open,
        };
        self.invoices
            .lock()
            .expect("lock poisoned")
            .insert(hash_bytes, invoice.clone());
        Ok(invoice)
    }

    async fn subscribe_invoice_updates(
        &self,
    ) -> Result<mpsc::Receiver<InvoiceUpdate>, PaymentNodeError> {
        let (tx, rx) = mpsc::channel(128);
        *self.updates.lock().expect("lock poisoned") = Some(tx);
        Ok(rx)
    }

    async fn list_open_invoices(&self) -> Result<Vec<Invoice>, PaymentNodeError> {
        Ok(self
            .invoices
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|i| i.state == InvoiceState::Open)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_invoice_starts_open() {
        let node = StubPaymentNode::new();
        let invoice = node.create_invoice(1000, "test").await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Open);
    }

    #[tokio::test]
    async fn settle_notifies_subscription() {
        let node = StubPaymentNode::new();
        let mut rx = node.subscribe_invoice_updates().await.unwrap();
        let invoice = node.create_invoice(1000, "test").await.unwrap();
        node.settle(invoice.payment_hash);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.state, InvoiceState::Settled);
    }
}
