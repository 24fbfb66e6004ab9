//! Admission for administrator routes: bearer token or cookie session
//! (with double-submit CSRF), then an optional permission gate.

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use super::{
    cookies::verify_request,
    permissions::role_has_permission,
    tokens::{SessionUser, TokenError},
};
use crate::{
    errors::ServiceError,
    middleware_helpers::client::ClientInfo,
    services::{
        admin_auth::AdminAuthService,
        audit::{AnomalyKind, AuditService},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Bearer,
    Cookie,
}

/// Verified administrator placed in request extensions.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user: SessionUser,
    pub mode: AuthMode,
}

impl AdminSession {
    pub fn can(&self, permission: &str) -> bool {
        role_has_permission(&self.user.role, permission)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AdminSession>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".into()))
    }
}

#[derive(Clone)]
pub struct AdminGateway {
    auth: AdminAuthService,
    audit: AuditService,
}

impl AdminGateway {
    pub fn new(auth: AdminAuthService, audit: AuditService) -> Self {
        Self { auth, audit }
    }

    /// Resolves the caller to an active administrator. A bearer header is
    /// tried first; cookie mode additionally checks the CSRF header.
    pub async fn admit(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        client: &ClientInfo,
    ) -> Result<AdminSession, ServiceError> {
        let (claims, mode) = match bearer_token(headers) {
            Some(token) => (self.auth.tokens().verify_access(token)?, AuthMode::Bearer),
            None => match verify_request(self.auth.tokens(), method, headers) {
                Ok(claims) => (claims, AuthMode::Cookie),
                Err(TokenError::CsrfMismatch) => {
                    self.audit
                        .log_anomaly(AnomalyKind::CsrfMismatch, json!({ "path": path }), client)
                        .await;
                    return Err(TokenError::CsrfMismatch.into());
                }
                Err(e) => return Err(e.into()),
            },
        };

        let user = self.auth.load_active(claims.user_id).await?;
        debug!(user_id = %user.id, ?mode, "administrator admitted");
        Ok(AdminSession {
            user: SessionUser::from(&user),
            mode,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn admin_session_middleware(
    State(gateway): State<AdminGateway>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientInfo::from_parts(request.headers(), peer);
    let admitted = gateway
        .admit(request.method(), request.uri().path(), request.headers(), &client)
        .await;
    match admitted {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

pub async fn permission_middleware(
    State(required_permission): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let session = request
        .extensions()
        .get::<AdminSession>()
        .ok_or_else(|| ServiceError::Unauthorized("Authentication required".into()))?;

    if !session.can(&required_permission) {
        return Err(ServiceError::Forbidden("Insufficient permissions".into()));
    }
    Ok(next.run(request).await)
}

/// Extension methods for Router to add admin admission
pub trait AuthRouterExt {
    fn with_admin_session(self, gateway: AdminGateway) -> Self;
    fn with_permission(self, gateway: AdminGateway, permission: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_admin_session(self, gateway: AdminGateway) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            gateway,
            admin_session_middleware,
        ))
    }

    fn with_permission(self, gateway: AdminGateway, permission: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission.to_string(),
            permission_middleware,
        ))
        .with_admin_session(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok.en"));
        assert_eq!(bearer_token(&headers), Some("tok.en"));
    }

    #[test]
    fn viewers_cannot_update_orders() {
        let session = AdminSession {
            user: SessionUser {
                id: uuid::Uuid::new_v4(),
                email: "v@shop.example".into(),
                name: "V".into(),
                role: "viewer".into(),
            },
            mode: AuthMode::Cookie,
        };
        assert!(session.can("orders:read"));
        assert!(!session.can("orders:update"));
    }
}
