//! Cookie assembly and double-submit verification for administrator sessions.

use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderValue, Method};

use super::tokens::{
    AccessClaims, SessionTokens, TokenError, TokenService, ACCESS_TOKEN_TTL_SECS,
    REFRESH_TOKEN_TTL_SECS,
};
use crate::{crypto::constant_time_eq, errors::ServiceError};

pub const ACCESS_COOKIE: &str = "fs_access_token";
pub const REFRESH_COOKIE: &str = "fs_refresh_token";
pub const CSRF_COOKIE: &str = "fs_csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

struct CookieAttrs {
    name: &'static str,
    path: &'static str,
    http_only: bool,
    max_age: i64,
}

const ACCESS_ATTRS: CookieAttrs = CookieAttrs {
    name: ACCESS_COOKIE,
    path: "/",
    http_only: true,
    max_age: ACCESS_TOKEN_TTL_SECS,
};

// Only sent to the authentication endpoints.
const REFRESH_ATTRS: CookieAttrs = CookieAttrs {
    name: REFRESH_COOKIE,
    path: "/api",
    http_only: true,
    max_age: REFRESH_TOKEN_TTL_SECS,
};

// Readable by page scripts so they can mirror it into the request header.
const CSRF_ATTRS: CookieAttrs = CookieAttrs {
    name: CSRF_COOKIE,
    path: "/",
    http_only: false,
    max_age: REFRESH_TOKEN_TTL_SECS,
};

fn build_cookie(attrs: &CookieAttrs, value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!("{}={}", attrs.name, value);
    if attrs.http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie.push_str(&format!(
        "; Path={}; SameSite=Strict; Max-Age={}",
        attrs.path, max_age
    ));
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn header_value(cookie: String) -> Result<HeaderValue, ServiceError> {
    HeaderValue::try_from(cookie)
        .map_err(|e| ServiceError::InternalError(format!("invalid cookie header: {}", e)))
}

/// `Set-Cookie` values for a freshly issued session.
pub fn session_cookies(
    tokens: &SessionTokens,
    secure: bool,
) -> Result<[HeaderValue; 3], ServiceError> {
    Ok([
        header_value(build_cookie(
            &ACCESS_ATTRS,
            &tokens.access,
            ACCESS_ATTRS.max_age,
            secure,
        ))?,
        header_value(build_cookie(
            &REFRESH_ATTRS,
            &tokens.refresh,
            REFRESH_ATTRS.max_age,
            secure,
        ))?,
        header_value(build_cookie(&CSRF_ATTRS, &tokens.csrf, CSRF_ATTRS.max_age, secure))?,
    ])
}

/// Expires all three session cookies.
pub fn clear_cookies(secure: bool) -> Result<[HeaderValue; 3], ServiceError> {
    Ok([
        header_value(build_cookie(&ACCESS_ATTRS, "", 0, secure))?,
        header_value(build_cookie(&REFRESH_ATTRS, "", 0, secure))?,
        header_value(build_cookie(&CSRF_ATTRS, "", 0, secure))?,
    ])
}

pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}

/// Cookie-mode verification: a valid access cookie, plus the CSRF header
/// mirroring the CSRF cookie on state-changing methods.
pub fn verify_request(
    tokens: &TokenService,
    method: &Method,
    headers: &HeaderMap,
) -> Result<AccessClaims, TokenError> {
    let cookies = parse_cookies(headers);
    let access = cookies
        .get(ACCESS_COOKIE)
        .filter(|v| !v.is_empty())
        .ok_or(TokenError::Missing)?;
    let claims = tokens.verify_access(access)?;

    if is_state_changing(method) {
        let cookie = cookies
            .get(CSRF_COOKIE)
            .filter(|v| !v.is_empty())
            .ok_or(TokenError::CsrfMismatch)?;
        let header = headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(TokenError::CsrfMismatch)?;
        if !constant_time_eq(cookie.as_bytes(), header.as_bytes()) {
            return Err(TokenError::CsrfMismatch);
        }
    }

    Ok(claims)
}
