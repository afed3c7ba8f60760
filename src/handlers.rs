//! HTTP wiring: axum `Router` assembly, CORS, and the single fallback
//! handler that runs C6 (match) then C5 (authenticate) then C6 (forward)
//! for every request, mirroring the teacher's `routes()` + state pattern
//! in its own `handlers.rs`.

use crate::authenticator::{AuthDecision, Authenticator};
use crate::dispatcher::{Dispatcher, Target};
use crate::error::ProxyError;
use crate::payment_node::PaymentNode;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState<P: PaymentNode> {
    pub dispatcher: Arc<Dispatcher>,
    pub authenticator: Arc<Authenticator<P>>,
}

impl<P: PaymentNode> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            authenticator: self.authenticator.clone(),
        }
    }
}

/// Assembles the full proxy router: one fallback handler for every
/// method/path (dispatch is host/path-regexp driven, not axum's route
/// tree), wrapped in request tracing and CORS.
pub fn build_router<P>(state: AppState<P>, cors_origins: &[String]) -> Router
where
    P: PaymentNode + 'static,
{
    Router::new()
        .fallback(handle::<P>)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, ACCEPT, AUTHORIZATION]);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer.allow_origin(parsed)
    }
}

fn host_of(req: &Request) -> String {
    req.headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default()
        .to_string()
}

/// Runs C6's match, C5's authenticate (only when the matched service
/// requires it), then C6's forward. Local-service handlers bypass
/// authentication entirely; that contract lives with whoever registered
/// the local service.
async fn handle<P>(
    State(state): State<AppState<P>>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response
where
    P: PaymentNode + 'static,
{
    let host = host_of(&req);
    let path = req.uri().path().to_string();
    let (parts, body) = req.into_parts();

    let target = state.dispatcher.match_target(&host, &path, &parts);
    match target {
        Target::NotFound => ProxyError::NotFound.into_response(),
        Target::Local(local) => {
            let req = Request::from_parts(parts, body);
            (local.handler)(req).await
        }
        Target::Remote(service) => {
            if service.auth_required {
                match state.authenticator.authenticate(&service, &parts.headers).await {
                    AuthDecision::Allow => {}
                    AuthDecision::Challenge(challenge) => {
                        return ProxyError::Challenge(challenge).into_response();
                    }
                    AuthDecision::Unavailable => return ProxyError::Unavailable.into_response(),
                }
            }
            let req = Request::from_parts(parts, body);
            match state
                .dispatcher
                .forward(&service, &client_addr.to_string(), req)
                .await
            {
                Ok(response) => response,
                Err(err) => ProxyError::Dispatch(err).into_response(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenger::Challenger;
    use crate::dispatcher::{compile_service, Dispatcher};
    use crate::minter::Minter;
    use crate::payment_node::StubPaymentNode;
    use crate::registry::ServiceRegistry;
    use crate::secret_store::SecretStore;
    use crate::service_limiter::ServiceLimiter;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn free_service_config(backend: &str) -> crate::config::ServiceConfig {
        crate::config::ServiceConfig {
            name: "echo".to_string(),
            host_regexp: ".*".to_string(),
            path_regexp: "^/echo".to_string(),
            price_msat: 0,
            auth_required: false,
            capabilities: vec![],
            backend: backend.to_string(),
            timeout_secs: 5,
        }
    }

    async fn build_state(
        services: Vec<crate::config::ServiceConfig>,
    ) -> (AppState<StubPaymentNode>, Arc<StubPaymentNode>) {
        let compiled: Vec<_> = services.iter().map(|s| compile_service(s).unwrap()).collect();
        let registry = Arc::new(ServiceRegistry::new(compiled).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), vec![]));

        let node = Arc::new(StubPaymentNode::new());
        let challenger = Arc::new(Challenger::new(
            node.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        let limiter = Arc::new(ServiceLimiter::new(registry));
        let dir = tempfile::tempdir().unwrap();
        let secret_store = Arc::new(SecretStore::open(&dir.into_path()).unwrap());
        let minter = Arc::new(Minter::new(secret_store, challenger, limiter));
        let authenticator = Arc::new(Authenticator::new(minter));

        (
            AppState {
                dispatcher,
                authenticator,
            },
            node,
        )
    }

    fn request_with_connect_info(uri: &str) -> HttpRequest<Body> {
        let mut req = HttpRequest::builder().uri(uri).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
        req
    }

    #[tokio::test]
    async fn unmatched_request_falls_through_to_404() {
        let (state, _node) = build_state(vec![]).await;
        let router = build_router(state, &[]);
        let response = router
            .oneshot(request_with_connect_info("/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn paid_service_without_token_returns_402_with_www_authenticate() {
        let mut config = free_service_config("http://backend.invalid");
        config.name = "paid".to_string();
        config.path_regexp = "^/paid".to_string();
        config.price_msat = 1000;
        config.auth_required = true;
        let (state, _node) = build_state(vec![config]).await;
        let router = build_router(state, &[]);
        let response = router
            .oneshot(request_with_connect_info("/paid/r"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert!(response
            .headers()
            .get(axum::http::header::WWW_AUTHENTICATE)
            .is_some());
    }

    #[tokio::test]
    async fn local_service_passthrough_bypasses_auth_entirely() {
        let registry = Arc::new(ServiceRegistry::new(vec![]).unwrap());
        let local = crate::dispatcher::LocalService {
            name: "gateway".to_string(),
            predicate: Arc::new(|parts| parts.uri.path().starts_with("/local")),
            handler: Arc::new(|_req| Box::pin(async { (StatusCode::OK, "ok").into_response() })),
        };
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), vec![local]));

        let node = Arc::new(StubPaymentNode::new());
        let challenger = Arc::new(Challenger::new(
            node,
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        let limiter = Arc::new(ServiceLimiter::new(registry));
        let dir = tempfile::tempdir().unwrap();
        let secret_store = Arc::new(SecretStore::open(&dir.into_path()).unwrap());
        let minter = Arc::new(Minter::new(secret_store, challenger, limiter));
        let authenticator = Arc::new(Authenticator::new(minter));
        let state = AppState {
            dispatcher,
            authenticator,
        };

        let router = build_router(state, &[]);
        let response = router
            .oneshot(request_with_connect_info("/local/anything"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
