//! C5: the front of every authenticated request. Decides allow/challenge
//! and leaves response construction (402 body, headers) to `error.rs`,
//! matching the teacher's separation of domain decision from the
//! `IntoResponse` edge.

use crate::dispatcher::Service;
use crate::minter::{Minter, MinterError};
use crate::payment_node::PaymentNode;
use crate::token::caveat::CaveatContext;
use crate::token::wire;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use std::sync::Arc;

/// The outcome of authenticating one request against one matched service.
pub enum AuthDecision {
    /// The request carried a valid, settled, capability-satisfying token.
    Allow,
    /// No valid token was presented; here is a fresh one to pay for.
    Challenge(crate::minter::MintedChallenge),
    /// The payment node or secret store is down; retry later.
    Unavailable,
}

pub struct Authenticator<P: PaymentNode> {
    minter: Arc<Minter<P>>,
}

impl<P: PaymentNode + 'static> Authenticator<P> {
    pub fn new(minter: Arc<Minter<P>>) -> Self {
        Self { minter }
    }

    /// Runs the C5 contract for one request against `service`. Callers
    /// should skip this entirely when `!service.auth_required`.
    pub async fn authenticate(&self, service: &Service, headers: &HeaderMap) -> AuthDecision {
        let granted = parse_capabilities_header(headers);
        let ctx = CaveatContext {
            request_capabilities: &granted,
        };

        let Some((token, preimage)) = parse_lsat_header(headers) else {
            return self.mint_challenge(service).await;
        };

        match self.minter.verify_lsat(&token, &preimage, &ctx).await {
            Ok(()) => AuthDecision::Allow,
            Err(MinterError::ChallengerUnavailable(_)) | Err(MinterError::StorageUnavailable(_)) => {
                AuthDecision::Unavailable
            }
            Err(
                MinterError::InvalidToken
                | MinterError::InvalidPreimage
                | MinterError::PaymentPending
                | MinterError::PaymentCanceled
                | MinterError::CaveatNotSatisfied(_),
            ) => self.mint_challenge(service).await,
            Err(MinterError::UnknownService) => AuthDecision::Unavailable,
        }
    }

    async fn mint_challenge(&self, service: &Service) -> AuthDecision {
        if !self.minter.is_healthy() {
            return AuthDecision::Unavailable;
        }
        match self.minter.mint_with_challenge(&service.name).await {
            Ok(challenge) => AuthDecision::Challenge(challenge),
            Err(_) => AuthDecision::Unavailable,
        }
    }
}

/// Parses `X-Lsat-Capabilities: cap1,cap2`: the capabilities this caller's
/// credentials actually grant. Independent of the matched service's own
/// `capabilities` caveat, so `capabilities ⊇ required` is a real check
/// rather than comparing a set against itself. Absent header grants none.
fn parse_capabilities_header(headers: &HeaderMap) -> Vec<String> {
    headers
        .get("x-lsat-capabilities")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').filter(|c| !c.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Parses `Authorization: LSAT <b64token>:<hexpreimage>`. Anything
/// malformed is treated the same as absent: the caller falls through to
/// issuing a fresh challenge.
fn parse_lsat_header(headers: &HeaderMap) -> Option<(crate::token::Token, [u8; 32])> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let rest = value.strip_prefix("LSAT ")?;
    let (b64_token, hex_preimage) = rest.split_once(':')?;
    let token = wire::decode(b64_token).ok()?;
    let preimage_bytes = hex::decode(hex_preimage).ok()?;
    if preimage_bytes.len() != 32 {
        return None;
    }
    let mut preimage = [0u8; 32];
    preimage.copy_from_slice(&preimage_bytes);
    Some((token, preimage))
}
