//! Top-level error-to-HTTP-response mapping. Each component keeps its own
//! `thiserror` enum transport-agnostic; this is the one place a `Result`
//! becomes a status code, mirroring the teacher's
//! `impl IntoResponse for FacilitatorLocalError` in `handlers.rs`.

use crate::dispatcher::DispatchError;
use crate::minter::MintedChallenge;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Everything the HTTP layer needs to turn a non-`Allow` outcome (or a
/// dispatch failure) into a response.
pub enum ProxyError {
    /// A fresh, unpaid challenge: `402` carrying `WWW-Authenticate: LSAT`.
    /// Covers `InvalidToken`, `InvalidPreimage`, `PaymentPending`,
    /// `PaymentCanceled` and `CaveatNotSatisfied` alike — the spec
    /// deliberately does not let a client distinguish these causes, to
    /// avoid a signature/preimage oracle.
    Challenge(MintedChallenge),
    /// The payment node or secret store is unreachable: `503`.
    Unavailable,
    /// No configured service matched the request.
    NotFound,
    /// The matched backend failed or timed out.
    Dispatch(DispatchError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Challenge(challenge) => challenge_response(&challenge),
            ProxyError::Unavailable => {
                let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from_static("5"));
                response
            }
            ProxyError::NotFound => crate::dispatcher::not_found(),
            ProxyError::Dispatch(err) => err.into_response(),
        }
    }
}

fn challenge_response(challenge: &MintedChallenge) -> Response {
    let macaroon = crate::token::wire::encode(&challenge.token);
    let header_value = format!(
        "LSAT macaroon=\"{macaroon}\", invoice=\"{}\"",
        challenge.payment_request
    );
    let mut response = (
        StatusCode::PAYMENT_REQUIRED,
        "payment required: pay the invoice and retry with Authorization: LSAT <macaroon>:<preimage>",
    )
        .into_response();
    match HeaderValue::from_str(&header_value) {
        Ok(value) => {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        Err(err) => {
            tracing::error!(%err, "challenge header value was not valid ascii");
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_node::PaymentHash;
    use crate::token::{Caveat, Token};

    fn sample_challenge() -> MintedChallenge {
        MintedChallenge {
            token: Token::sign(
                [1u8; 32],
                vec![Caveat::new("payment_hash", "ab")],
                &[2u8; 32],
            ),
            payment_request: "lnbc10n1p...".to_string(),
            payment_hash: PaymentHash([3u8; 32]),
        }
    }

    #[test]
    fn challenge_response_carries_exactly_one_www_authenticate_header() {
        let response = ProxyError::Challenge(sample_challenge()).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response
                .headers()
                .get_all(WWW_AUTHENTICATE)
                .iter()
                .count(),
            1
        );
    }

    #[test]
    fn unavailable_response_carries_retry_after() {
        let response = ProxyError::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(RETRY_AFTER));
    }
}
