//! Request authentication for the HTTP surface.
//!
//! Two accepted credentials: the static bearer token from
//! `HTTP_BEARER_TOKEN`, or no credential at all when the peer is on the
//! loopback interface and `HTTP_ALLOW_LOCALHOST_UNAUTHENTICATED` is set.

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bearer_token: Option<String>,
    pub allow_localhost: bool,
}

impl AuthConfig {
    pub fn from_app_config(config: &swarm_common::AppConfig) -> Self {
        if config.http.bearer_token.is_none() && !config.http.allow_localhost_unauthenticated {
            warn!("No HTTP_BEARER_TOKEN and localhost bypass disabled: every request will be rejected");
        }
        Self {
            bearer_token: config.http.bearer_token.clone(),
            allow_localhost: config.http.allow_localhost_unauthenticated,
        }
    }

    /// Decide whether a request may pass.
    fn permits(&self, bearer: Option<&str>, peer: Option<SocketAddr>) -> bool {
        if let (Some(expected), Some(provided)) = (self.bearer_token.as_deref(), bearer) {
            if expected == provided {
                return true;
            }
        }
        if self.allow_localhost {
            if let Some(peer) = peer {
                return peer.ip().is_loopback();
            }
        }
        false
    }
}

pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if auth.permits(bearer, peer) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
