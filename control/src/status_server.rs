//! Status HTTP server
//!
//! Read-only endpoints over the sync engine's reported API:
//! - `GET /healthz` liveness
//! - `GET /metrics` Prometheus text exposition
//! - `GET /global_rules` gateway rules as last applied, ordered by id
//! - `GET /global_rules/{id}` state of one id
//! - `GET /reconcile_errors` outstanding errors, ordered by id

use crate::apis::metrics::gather_controller_metrics;
use crate::error::ControllerError;
use crate::sync::SyncEngine;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const PROMETHEUS: &str = "text/plain; version=0.0.4";

/// A rendered response: status, content type, body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: TEXT,
            body: body.into(),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status: StatusCode::OK,
                content_type: JSON,
                body,
            },
            Err(e) => Self::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode response: {}", e),
            ),
        }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        if let Ok(value) = hyper::header::HeaderValue::from_str(self.content_type) {
            response
                .headers_mut()
                .insert(hyper::header::CONTENT_TYPE, value);
        }
        response
    }
}

#[derive(Serialize)]
struct RuleStatus<'a> {
    id: &'a str,
    state: String,
    desired: Option<common::PluginMap>,
    applied: Option<common::PluginMap>,
}

/// Route one request against the engine
pub fn route(method: &Method, path: &str, engine: &SyncEngine) -> Reply {
    if method != Method::GET {
        return Reply::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path.trim_end_matches('/') {
        "/healthz" => Reply::text(StatusCode::OK, "ok"),
        "/metrics" => match gather_controller_metrics() {
            Ok(body) => Reply {
                status: StatusCode::OK,
                content_type: PROMETHEUS,
                body,
            },
            Err(e) => Reply::text(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        "/global_rules" => Reply::json(&engine.current_global_rules()),
        "/reconcile_errors" => Reply::json(&engine.reconcile_errors()),
        other => match other.strip_prefix("/global_rules/") {
            Some(id) if !id.is_empty() && !id.contains('/') => {
                let desired = engine.desired_snapshot().remove(id).map(|m| m.plugins);
                let applied = engine
                    .current_global_rules()
                    .into_iter()
                    .find(|rule| rule.id == id)
                    .map(|rule| rule.plugins);
                if desired.is_none() && applied.is_none() {
                    return Reply::text(StatusCode::NOT_FOUND, "unknown global rule");
                }
                Reply::json(&RuleStatus {
                    id,
                    state: engine.rule_state(id).to_string(),
                    desired,
                    applied,
                })
            }
            _ => Reply::text(StatusCode::NOT_FOUND, "not found"),
        },
    }
}

/// HTTP/1 server exposing [`route`]
pub struct StatusServer {
    listener: TcpListener,
    engine: SyncEngine,
}

impl StatusServer {
    /// Bind immediately so address conflicts surface at startup
    pub async fn bind(bind_addr: &str, engine: SyncEngine) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { listener, engine })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControllerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires (or its sender is dropped)
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let addr = self
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!("📊 status server listening on {}", addr);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("Accepted status connection from {}", peer_addr);
                            let engine = self.engine.clone();

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                                    let engine = engine.clone();
                                    async move {
                                        let reply = route(req.method(), req.uri().path(), &engine);
                                        Ok::<_, Infallible>(reply.into_response())
                                    }
                                });

                                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                    debug!("Status connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on status server: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Status server received shutdown signal");
                    break;
                }
            }
        }
    }
}
