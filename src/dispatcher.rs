//! C6: matches an incoming request to exactly one backend and forwards
//! it, or falls through to a 404.

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use std::future::Future;
use reqwest::Client;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::registry::ServiceRegistry;

/// Where a matched service forwards to.
#[derive(Clone)]
pub enum Backend {
    Remote(Url),
    /// References a [`LocalService`] by name; resolved at dispatch time
    /// against the process-wired local service list.
    Local(String),
}

/// A configured backend service, compiled and ready to match against.
#[derive(Clone)]
pub struct Service {
    pub name: String,
    pub host_regexp: Regex,
    pub path_regexp: Regex,
    pub price_msat: u64,
    pub auth_required: bool,
    pub capabilities: Vec<String>,
    pub backend: Backend,
    pub timeout: Duration,
}

impl Service {
    pub fn matches(&self, host: &str, path: &str) -> bool {
        self.host_regexp.is_match(host) && self.path_regexp.is_match(path)
    }
}

type LocalPredicate = Arc<dyn Fn(&axum::http::request::Parts) -> bool + Send + Sync>;
type LocalHandler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync>;

/// An in-process handler, representative of the packaged local
/// message-gateway service. Business logic behind the handler is out of
/// scope; only the first-match-wins dispatch contract is specified here.
#[derive(Clone)]
pub struct LocalService {
    pub name: String,
    pub predicate: LocalPredicate,
    pub handler: LocalHandler,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
    #[error("backend request timed out")]
    Timeout,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match self {
            DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT.into_response(),
            DispatchError::Backend(err) => {
                tracing::warn!(%err, "backend error");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

/// Headers scoped to a single hop; must be stripped in both directions
/// per RFC 7230 §6.1.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// The outcome of matching a request against the current snapshot.
pub enum Target {
    Remote(Service),
    Local(LocalService),
    NotFound,
}

pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    local_services: Vec<LocalService>,
    client: Client,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, local_services: Vec<LocalService>) -> Self {
        Self {
            registry,
            local_services,
            client: Client::new(),
        }
    }

    /// Matches `host`/`path`/`parts` against the current snapshot: remote
    /// services first in configured order, then local services in
    /// registration order, else [`Target::NotFound`].
    pub fn match_target(
        &self,
        host: &str,
        path: &str,
        parts: &axum::http::request::Parts,
    ) -> Target {
        let snapshot = self.registry.snapshot();
        for service in snapshot.iter() {
            if service.matches(host, path) {
                return Target::Remote(service.clone());
            }
        }
        for local in &self.local_services {
            if (local.predicate)(parts) {
                return Target::Local(local.clone());
            }
        }
        Target::NotFound
    }

    /// Forwards `req` to `service.backend`, preserving method, headers
    /// (minus hop-by-hop), body, and query; setting `X-Forwarded-*`;
    /// bounded by `service.timeout`.
    pub async fn forward(
        &self,
        service: &Service,
        client_addr: &str,
        req: Request,
    ) -> Result<Response, DispatchError> {
        let Backend::Remote(backend_url) = &service.backend else {
            unreachable!("forward is only called for Backend::Remote targets");
        };
        let (parts, body) = req.into_parts();
        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_else(|_| Bytes::new());

        let mut target_url = backend_url.clone();
        target_url.set_path(&join_paths(backend_url.path(), parts.uri.path()));
        target_url.set_query(parts.uri.query());

        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        let host = backend_url.host_str().unwrap_or_default();
        headers.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_str(client_addr).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            HeaderName::from_static("x-forwarded-host"),
            HeaderValue::from_str(host).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static(if backend_url.scheme() == "https" {
                "https"
            } else {
                "http"
            }),
        );

        let method =
            reqwest::Method::from_bytes(parts.method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
        let request = self
            .client
            .request(method, target_url)
            .headers(headers_to_reqwest(&headers))
            .body(body_bytes)
            .timeout(service.timeout)
            .build()?;

        let response = match tokio::time::timeout(service.timeout, self.client.execute(request))
            .await
        {
            Ok(result) => result?,
            Err(_) => return Err(DispatchError::Timeout),
        };

        let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut resp_headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                resp_headers.append(name, value);
            }
        }
        strip_hop_by_hop(&mut resp_headers);
        let body_bytes = response.bytes().await?;

        let mut builder = Response::builder().status(status);
        *builder.headers_mut().unwrap() = resp_headers;
        Ok(builder.body(Body::from(body_bytes)).expect("valid response"))
    }
}

fn join_paths(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    format!("{base}/{suffix}")
}

fn headers_to_reqwest(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

pub fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

pub fn compile_service(config: &crate::config::ServiceConfig) -> Result<Service, crate::registry::RegistryError> {
    use crate::registry::RegistryError;
    let host_regexp =
        Regex::new(&config.host_regexp).map_err(|source| RegistryError::InvalidHostRegexp {
            service: config.name.clone(),
            source,
        })?;
    let path_regexp =
        Regex::new(&config.path_regexp).map_err(|source| RegistryError::InvalidPathRegexp {
            service: config.name.clone(),
            source,
        })?;
    let backend = if let Some(local_name) = config.backend.strip_prefix("local:") {
        Backend::Local(local_name.to_string())
    } else {
        Backend::Remote(
            config
                .backend
                .parse()
                .unwrap_or_else(|_| "http://invalid.invalid".parse().unwrap()),
        )
    };
    Ok(Service {
        name: config.name.clone(),
        host_regexp,
        path_regexp,
        price_msat: config.price_msat,
        auth_required: config.auth_required,
        capabilities: config.capabilities.clone(),
        backend,
        timeout: Duration::from_secs(config.timeout_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(host: &str, path: &str) -> Service {
        Service {
            name: "svc".to_string(),
            host_regexp: Regex::new(host).unwrap(),
            path_regexp: Regex::new(path).unwrap(),
            price_msat: 0,
            auth_required: false,
            capabilities: vec![],
            backend: Backend::Remote("http://backend.local".parse().unwrap()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn matches_both_host_and_path() {
        let svc = service("^proxy\\.local$", "^/echo");
        assert!(svc.matches("proxy.local", "/echo/x"));
        assert!(!svc.matches("proxy.local", "/other"));
        assert!(!svc.matches("other.local", "/echo/x"));
    }

    #[test]
    fn join_paths_handles_slashes() {
        assert_eq!(join_paths("http://b/", "/echo/x"), "http://b/echo/x");
        assert_eq!(join_paths("http://b", "echo/x"), "http://b/echo/x");
    }

    #[test]
    fn compile_service_resolves_local_backend() {
        let config = crate::config::ServiceConfig {
            name: "gateway".to_string(),
            host_regexp: ".*".to_string(),
            path_regexp: "^/gw".to_string(),
            price_msat: 0,
            auth_required: false,
            capabilities: vec![],
            backend: "local:gateway".to_string(),
            timeout_secs: 5,
        };
        let compiled = compile_service(&config).unwrap();
        assert!(matches!(compiled.backend, Backend::Local(ref n) if n == "gateway"));
    }
}
