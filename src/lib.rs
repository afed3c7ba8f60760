//! An authenticating reverse proxy that gates backend services behind a
//! payment-bearing bearer credential, in the style of HTTP 402 / LSAT.
//!
//! # Overview
//!
//! A client requesting a protected resource without a valid token is
//! challenged with an invoice; once paid, it presents the resulting token
//! and preimage on subsequent requests. The proxy dispatches authorized
//! requests to configured backends (reverse-proxied HTTP(S) services or
//! in-process handlers) based on host/path matching.
//!
//! # Modules
//!
//! - [`token`] — the capability credential: wire format, caveats, chain-HMAC signature.
//! - [`secret_store`] — durable token-secret storage (C1).
//! - [`challenger`] — payment invoice issuance and settlement tracking (C2).
//! - [`payment_node`] — the capability contract the challenger depends on.
//! - [`minter`] — token minting and verification (C3).
//! - [`service_limiter`] — caveat resolution per service (C4).
//! - [`authenticator`] — per-request allow/challenge decision (C5).
//! - [`dispatcher`] — route matching and forwarding (C6).
//! - [`registry`] — atomically-swapped service snapshot (C7).
//! - [`config`] — CLI + file + env configuration loading.
//! - [`telemetry`] — structured logging setup.
//! - [`shutdown`] — signal handling and graceful drain.
//! - [`error`] — top-level error-to-HTTP-response mapping.
//! - [`handlers`] — axum router assembly.
//! - [`tls`] — primary listener TLS termination.

pub mod authenticator;
pub mod challenger;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod minter;
pub mod payment_node;
pub mod registry;
pub mod secret_store;
pub mod service_limiter;
pub mod shutdown;
pub mod telemetry;
pub mod tls;
pub mod token;
