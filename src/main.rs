//! Authenticating reverse-proxy entrypoint.
//!
//! Loads configuration, wires C1-C7 together, and serves the assembled
//! router with graceful shutdown, following the teacher's `main.rs` shape
//! (`Config::load()`, `SigDown`) combined with `axum_server`'s
//! `Handle`-based graceful shutdown for TLS termination.

use dotenvy::dotenv;
use lsat_proxy::authenticator::Authenticator;
use lsat_proxy::challenger::Challenger;
use lsat_proxy::config::Config;
use lsat_proxy::dispatcher::{compile_service, Dispatcher};
use lsat_proxy::handlers::{build_router, AppState};
use lsat_proxy::minter::Minter;
use lsat_proxy::payment_node::StubPaymentNode;
use lsat_proxy::registry::ServiceRegistry;
use lsat_proxy::secret_store::SecretStore;
use lsat_proxy::service_limiter::ServiceLimiter;
use lsat_proxy::shutdown::Shutdown;
use lsat_proxy::telemetry;
use lsat_proxy::tls;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    telemetry::init();

    // rustls 0.23 needs a process-wide default crypto provider installed
    // before the first handshake (TLS ingress or the outbound reqwest
    // client); both axum-server and reqwest are built against `ring` here.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("no crypto provider installed yet");

    let config = Config::load()?;

    let services: Vec<_> = config
        .services
        .iter()
        .map(compile_service)
        .collect::<Result<_, _>>()?;
    let registry = Arc::new(ServiceRegistry::new(services)?);

    let secret_store = Arc::new(SecretStore::open(&config.storage.path)?);

    // The payment node's wire shape is out of scope (see payment_node.rs);
    // a real deployment wires its own `PaymentNode` implementation behind
    // this trait. The in-memory stub keeps this binary runnable without one.
    let node = Arc::new(StubPaymentNode::new());
    let challenger = Arc::new(Challenger::new(
        node,
        config.unhealthy_threshold(),
        config.challenge_timeout(),
    ));
    challenger.spawn_subscription();

    let limiter = Arc::new(ServiceLimiter::new(registry.clone()));
    let minter = Arc::new(Minter::new(secret_store, challenger, limiter));
    let authenticator = Arc::new(Authenticator::new(minter));
    let dispatcher = Arc::new(Dispatcher::new(registry, vec![]));

    let state = AppState {
        dispatcher,
        authenticator,
    };
    let router = build_router(state, &config.cors_origins);

    let addr: SocketAddr = config.listen_addr;
    let rustls_config = tls::resolve(&config.tls).await?;
    tracing::info!(%addr, tls = rustls_config.is_some(), "starting lsat-proxy");

    let listener = std::net::TcpListener::bind(addr).unwrap_or_else(|e| {
        tracing::error!(%addr, error = %e, "failed to bind listener");
        std::process::exit(1);
    });
    listener.set_nonblocking(true)?;

    let shutdown = Shutdown::try_new()?;
    let cancellation_token = shutdown.cancellation_token();
    let drain_timeout = config.drain_timeout();

    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    let handle = axum_server::Handle::new();

    let server_handle = handle.clone();
    let server = tokio::spawn(async move {
        match rustls_config {
            Some(rustls_config) => {
                axum_server::from_tcp_rustls(listener, rustls_config)
                    .handle(server_handle)
                    .serve(make_service)
                    .await
            }
            None => {
                axum_server::from_tcp(listener)
                    .handle(server_handle)
                    .serve(make_service)
                    .await
            }
        }
    });

    cancellation_token.cancelled().await;
    tracing::info!(?drain_timeout, "shutdown signal received, draining in-flight requests");
    handle.graceful_shutdown(Some(drain_timeout));

    match tokio::time::timeout(drain_timeout + Duration::from_secs(1), server).await {
        Ok(Ok(Ok(()))) => tracing::info!("server drained cleanly"),
        Ok(Ok(Err(err))) => tracing::error!(%err, "server exited with an error"),
        Ok(Err(err)) => tracing::error!(%err, "server task panicked"),
        Err(_) => tracing::warn!("drain timeout elapsed with requests still in flight"),
    }

    Ok(())
}
