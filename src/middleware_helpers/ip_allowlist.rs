use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::client::ClientInfo;
use crate::{
    errors::ServiceError,
    services::audit::{AnomalyKind, AuditService},
};

/// Administrator source addresses. Empty admits everyone.
#[derive(Clone)]
pub struct IpAllowlist {
    allowed: Arc<HashSet<String>>,
    audit: AuditService,
}

impl IpAllowlist {
    pub fn new(allowed: impl IntoIterator<Item = String>, audit: AuditService) -> Self {
        Self {
            allowed: Arc::new(
                allowed
                    .into_iter()
                    .map(|ip| ip.trim().to_string())
                    .filter(|ip| !ip.is_empty())
                    .collect(),
            ),
            audit,
        }
    }

    pub fn permits(&self, ip: Option<&str>) -> bool {
        self.allowed.is_empty() || ip.is_some_and(|ip| self.allowed.contains(ip))
    }
}

/// Runs ahead of authentication so blocked callers learn nothing about
/// token validity.
pub async fn ip_allowlist_middleware(
    State(allowlist): State<IpAllowlist>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientInfo::from_parts(request.headers(), peer);

    if allowlist.permits(client.ip.as_deref()) {
        return next.run(request).await;
    }

    allowlist
        .audit
        .log_anomaly(
            AnomalyKind::BlockedIp,
            json!({ "path": request.uri().path() }),
            &client,
        )
        .await;
    ServiceError::Forbidden("Access denied".into()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    async fn allowlist(ips: &[&str]) -> IpAllowlist {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        IpAllowlist::new(
            ips.iter().map(|s| s.to_string()),
            AuditService::new(Arc::new(db)),
        )
    }

    #[tokio::test]
    async fn empty_list_admits_everyone() {
        let list = allowlist(&[]).await;
        assert!(list.permits(Some("203.0.113.9")));
        assert!(list.permits(None));
    }

    #[tokio::test]
    async fn configured_list_is_exact() {
        let list = allowlist(&["198.51.100.7", " 10.0.0.1 "]).await;
        assert!(list.permits(Some("198.51.100.7")));
        assert!(list.permits(Some("10.0.0.1")));
        assert!(!list.permits(Some("198.51.100.8")));
        assert!(!list.permits(None));
    }
}
