//! C3: mints tokens bound to a caveat set and an invoice, and validates
//! presented tokens against caveats and invoice settlement.

use crate::challenger::{Challenger, ChallengerError, InvoiceStatus};
use crate::payment_node::{PaymentHash, PaymentNode};
use crate::secret_store::{SecretStore, SecretStoreError};
use crate::service_limiter::ServiceLimiter;
use crate::token::Token;
use crate::token::caveat::{CaveatContext, CaveatEvalError, evaluate};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinterError {
    #[error("unknown service")]
    UnknownService,
    #[error("challenger unavailable: {0}")]
    ChallengerUnavailable(#[from] ChallengerError),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] SecretStoreError),
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid preimage")]
    InvalidPreimage,
    #[error("payment pending")]
    PaymentPending,
    #[error("payment canceled")]
    PaymentCanceled,
    #[error("caveat not satisfied: {0}")]
    CaveatNotSatisfied(#[from] CaveatEvalError),
}

/// The result of a successful mint: the unpaid token plus the invoice
/// the client must pay to redeem it.
pub struct MintedChallenge {
    pub token: Token,
    pub payment_request: String,
    pub payment_hash: PaymentHash,
}

pub struct Minter<P: PaymentNode> {
    secret_store: Arc<SecretStore>,
    challenger: Arc<Challenger<P>>,
    service_limiter: Arc<ServiceLimiter>,
}

impl<P: PaymentNode + 'static> Minter<P> {
    pub fn new(
        secret_store: Arc<SecretStore>,
        challenger: Arc<Challenger<P>>,
        service_limiter: Arc<ServiceLimiter>,
    ) -> Self {
        Self {
            secret_store,
            challenger,
            service_limiter,
        }
    }

    /// True unless the payment node subscription has been disconnected
    /// beyond the challenger's unhealthy threshold. Paid-token validation
    /// ignores this — it only reads the settlement cache — but minting a
    /// fresh challenge needs a node that can plausibly still settle it.
    pub fn is_healthy(&self) -> bool {
        self.challenger.is_healthy()
    }

    /// Mints a new, unpaid token for `service_name`. Always mints fresh
    /// (callers never reuse a prior token) so a client observing a 402
    /// and paying always gets exactly one valid redemption path.
    pub async fn mint_with_challenge(
        &self,
        service_name: &str,
    ) -> Result<MintedChallenge, MinterError> {
        let resolved = self
            .service_limiter
            .resolve(service_name)
            .ok_or(MinterError::UnknownService)?;

        let (payment_request, payment_hash) =
            self.challenger.new_challenge(resolved.price_msat).await?;

        let mut id = random_id();
        let secret = match self.secret_store.new_secret(id).await {
            Ok(secret) => secret,
            Err(SecretStoreError::AlreadyExists) => {
                id = random_id();
                self.secret_store.new_secret(id).await?
            }
            Err(other) => return Err(other.into()),
        };

        let mut caveats = vec![crate::token::Caveat::new(
            "payment_hash",
            payment_hash.to_string(),
        )];
        caveats.extend(resolved.caveats);

        let token = Token::sign(id, caveats, &secret);
        Ok(MintedChallenge {
            token,
            payment_request,
            payment_hash,
        })
    }

    /// Verifies a presented token against its preimage and the current
    /// request context. The spec deliberately does not distinguish a bad
    /// signature from a bad preimage in the caller-visible error: both
    /// collapse to the same HTTP response shape at the edge, to avoid an
    /// oracle (see `src/error.rs`).
    pub async fn verify_lsat(
        &self,
        token: &Token,
        preimage: &[u8; 32],
        ctx: &CaveatContext<'_>,
    ) -> Result<(), MinterError> {
        let secret = self
            .secret_store
            .reveal_secret(token.id)
            .await
            .map_err(|_| MinterError::InvalidToken)?;

        if !token.signature_valid(&secret) {
            return Err(MinterError::InvalidToken);
        }

        let payment_hash_caveat = token
            .caveat("payment_hash")
            .ok_or(MinterError::InvalidToken)?;

        let computed_hash = Sha256::digest(preimage);
        if hex::encode(computed_hash) != payment_hash_caveat.value {
            return Err(MinterError::InvalidPreimage);
        }

        let mut hash_bytes = [0u8; 32];
        hash_bytes.copy_from_slice(&computed_hash);
        let payment_hash = PaymentHash(hash_bytes);

        match self.challenger.verify_invoice_status(payment_hash) {
            InvoiceStatus::Settled => {}
            InvoiceStatus::Open | InvoiceStatus::Unknown => return Err(MinterError::PaymentPending),
            InvoiceStatus::Canceled => return Err(MinterError::PaymentCanceled),
        }

        for caveat in &token.caveats {
            if caveat.key == "payment_hash" {
                continue;
            }
            evaluate(caveat, ctx)?;
        }

        Ok(())
    }
}

fn random_id() -> [u8; 32] {
    let mut id = [0u8; 32];
    rand::rng().fill_bytes(&mut id);
    id
}
