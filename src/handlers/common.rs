use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::{
    auth::{cookies, SessionUser},
    errors::ServiceError,
    services::admin_auth::AuthenticatedSession,
};

/// JSON body whose rejections come back as 400 in the standard error shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(JsonRejection::MissingJsonContentType(_)) => Err(ServiceError::BadRequest(
                "Content-Type must be application/json".into(),
            )),
            Err(rejection) => Err(ServiceError::BadRequest(format!(
                "Invalid request body: {}",
                rejection.body_text()
            ))),
        }
    }
}

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Attaches `Set-Cookie` headers to a response.
pub fn with_cookies(mut response: Response, cookies: [HeaderValue; 3]) -> Response {
    for cookie in cookies {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// Body plus the cookie trio for a freshly issued session.
pub fn session_response(
    session: &AuthenticatedSession,
    secure: bool,
    extra: Value,
) -> Result<Response, ServiceError> {
    let mut body = json!({
        "success": true,
        "user": user_json(&session.user),
        "csrfToken": session.tokens.csrf,
    });
    if let (Some(map), Value::Object(extra)) = (body.as_object_mut(), extra) {
        map.extend(extra);
    }
    Ok(with_cookies(
        success_response(body),
        cookies::session_cookies(&session.tokens, secure)?,
    ))
}

pub fn user_json(user: &SessionUser) -> Value {
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "role": user.role,
    })
}
