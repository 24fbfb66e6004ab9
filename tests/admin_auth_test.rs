//! Administrator login, MFA enrolment and verification, session refresh and
//! the gates in front of the admin routes.

mod common;

use axum::http::{header, Method};
use common::{
    cart_line, completed_event, response_json, totp_now, SessionCookies, TestApp, ADMIN_PASSWORD,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, IntoActiveModel};
use serde_json::json;
use storefront_api::{
    auth::{cookies, password::PasswordHasher},
    entities::{admin_user, order, OrderStatus},
};

fn cookie_header(session: &SessionCookies) -> (&'static str, String) {
    ("cookie", session.header())
}

async fn login(app: &TestApp, email: &str, password: &str) -> axum::response::Response {
    app.request(
        Method::POST,
        "/api/admin-auth",
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

#[tokio::test]
async fn first_login_requires_enrolment_then_issues_a_session() {
    let app = TestApp::new().await;
    app.seed_admin("owner@shop.example", "super_admin").await;

    let response = login(&app, "Owner@Shop.example", ADMIN_PASSWORD).await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["requiresMfaSetup"], true);
    let setup_token = body["setupToken"].as_str().unwrap().to_string();

    let setup = response_json(
        app.request(
            Method::POST,
            "/api/admin-mfa/setup",
            Some(json!({ "setupToken": setup_token })),
        )
        .await,
    )
    .await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    assert!(setup["otpauthUrl"].as_str().unwrap().starts_with("otpauth://totp/"));

    let wrong = app
        .request(
            Method::POST,
            "/api/admin-mfa/verify",
            Some(json!({ "setupToken": setup_token, "code": "000000x" })),
        )
        .await;
    assert_eq!(wrong.status(), 400);

    let verified = app
        .request(
            Method::POST,
            "/api/admin-mfa/verify",
            Some(json!({ "setup_token": setup_token, "code": totp_now(&secret) })),
        )
        .await;
    assert_eq!(verified.status(), 200);
    let session = SessionCookies::from_response(&verified);
    let body = response_json(verified).await;
    assert_eq!(body["backupCodes"].as_array().unwrap().len(), 10);
    assert_eq!(body["user"]["email"], "owner@shop.example");
    assert_eq!(body["csrfToken"], session.csrf.as_str());

    // the stored secret is encrypted, never the plain base32 value
    let stored = admin_user::Entity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.mfa_enabled);
    assert_ne!(stored.mfa_secret.as_deref(), Some(secret.as_str()));

    let check = app
        .request_with_headers(Method::GET, "/api/admin-auth", None, &[cookie_header(&session)])
        .await;
    assert_eq!(check.status(), 200);
    assert_eq!(response_json(check).await["valid"], true);
}

#[tokio::test]
async fn bad_credentials_share_one_message() {
    let app = TestApp::new().await;
    app.seed_admin("owner@shop.example", "admin").await;

    for (email, password) in [
        ("owner@shop.example", "not the password"),
        ("nobody@shop.example", ADMIN_PASSWORD),
    ] {
        let response = login(&app, email, password).await;
        assert_eq!(response.status(), 401);
        assert_eq!(
            response_json(response).await["message"],
            "Invalid email or password"
        );
    }

    let blank = login(&app, "", "").await;
    assert_eq!(blank.status(), 400);
}

#[tokio::test]
async fn repeated_failures_lock_the_account() {
    let app = TestApp::new().await;
    app.seed_admin("owner@shop.example", "admin").await;

    for _ in 0..5 {
        let response = login(&app, "owner@shop.example", "wrong").await;
        assert_eq!(response.status(), 401);
    }

    // even the right password is refused while locked
    let locked = login(&app, "owner@shop.example", ADMIN_PASSWORD).await;
    assert_eq!(locked.status(), 429);
    let retry_after: i64 = locked.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 15 * 60);
}

#[tokio::test]
async fn enrolment_codes_share_the_second_factor_lockout() {
    let app = TestApp::new().await;
    app.seed_admin("owner@shop.example", "admin").await;
    let body = response_json(login(&app, "owner@shop.example", ADMIN_PASSWORD).await).await;
    let setup_token = body["setupToken"].as_str().unwrap().to_string();
    let setup = response_json(
        app.request(
            Method::POST,
            "/api/admin-mfa/setup",
            Some(json!({ "setupToken": setup_token })),
        )
        .await,
    )
    .await;
    let secret = setup["secret"].as_str().unwrap().to_string();

    for _ in 0..5 {
        let wrong = app
            .request(
                Method::POST,
                "/api/admin-mfa/verify",
                Some(json!({ "setupToken": setup_token, "code": "abcdef" })),
            )
            .await;
        assert_eq!(wrong.status(), 400);
    }

    let locked = app
        .request(
            Method::POST,
            "/api/admin-mfa/verify",
            Some(json!({ "setupToken": setup_token, "code": totp_now(&secret) })),
        )
        .await;
    assert_eq!(locked.status(), 429);
    assert!(locked.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn regenerating_backup_codes_is_rate_limited() {
    let app = TestApp::new().await;
    let (session, secret) = app.enrolled_admin("owner@shop.example", "admin").await;
    let headers = [
        cookie_header(&session),
        (cookies::CSRF_HEADER, session.csrf.clone()),
    ];

    for _ in 0..5 {
        let wrong = app
            .request_with_headers(
                Method::POST,
                "/api/admin-mfa/regenerate",
                Some(json!({ "code": "abcdef" })),
                &headers,
            )
            .await;
        assert_eq!(wrong.status(), 400);
    }

    let locked = app
        .request_with_headers(
            Method::POST,
            "/api/admin-mfa/regenerate",
            Some(json!({ "code": totp_now(&secret) })),
            &headers,
        )
        .await;
    assert_eq!(locked.status(), 429);
}

#[tokio::test]
async fn legacy_password_hashes_are_upgraded_on_login() {
    let app = TestApp::new().await;
    let admin = app.seed_admin("owner@shop.example", "admin").await;

    let legacy = PasswordHasher::new(4, app.state.config.legacy_password_secret())
        .legacy_digest(ADMIN_PASSWORD);
    let mut active = admin.into_active_model();
    active.password_hash = Set(legacy.clone());
    active.update(&*app.state.db).await.unwrap();

    let response = login(&app, "owner@shop.example", ADMIN_PASSWORD).await;
    assert_eq!(response.status(), 200);

    let stored = admin_user::Entity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.password_hash.starts_with("$2"));
}

#[tokio::test]
async fn enrolled_admins_verify_with_a_code() {
    let app = TestApp::new().await;
    let (_, secret) = app.enrolled_admin("owner@shop.example", "admin").await;

    let challenge = response_json(login(&app, "owner@shop.example", ADMIN_PASSWORD).await).await;
    assert_eq!(challenge["requiresMfa"], true);
    let pre_mfa = challenge["preMfaToken"].as_str().unwrap().to_string();

    let wrong = app
        .request(
            Method::POST,
            "/api/admin-mfa/validate",
            Some(json!({ "preMfaToken": pre_mfa, "code": "12345" })),
        )
        .await;
    assert_eq!(wrong.status(), 400);
    assert_eq!(
        response_json(wrong).await["message"],
        "Invalid verification code"
    );

    let ok = app
        .request(
            Method::POST,
            "/api/admin-mfa/validate",
            Some(json!({ "preMfaToken": pre_mfa, "code": totp_now(&secret) })),
        )
        .await;
    assert_eq!(ok.status(), 200);
    let session = SessionCookies::from_response(&ok);
    assert!(!session.access.is_empty());
    assert!(!session.refresh.is_empty());

    let status = app
        .request_bearer(Method::GET, "/api/admin-mfa/status", None, &session.access)
        .await;
    assert_eq!(status.status(), 200);
    let status = response_json(status).await;
    assert_eq!(status["mfaEnabled"], true);
    assert_eq!(status["backupCodesRemaining"], 10);
}

#[tokio::test]
async fn backup_codes_work_exactly_once() {
    let app = TestApp::new().await;
    app.seed_admin("owner@shop.example", "admin").await;

    // enrol by hand to keep the backup codes
    let login_body = response_json(login(&app, "owner@shop.example", ADMIN_PASSWORD).await).await;
    let setup_token = login_body["setupToken"].as_str().unwrap().to_string();
    let setup = response_json(
        app.request(
            Method::POST,
            "/api/admin-mfa/setup",
            Some(json!({ "setupToken": setup_token })),
        )
        .await,
    )
    .await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    let verified = response_json(
        app.request(
            Method::POST,
            "/api/admin-mfa/verify",
            Some(json!({ "setupToken": setup_token, "code": totp_now(&secret) })),
        )
        .await,
    )
    .await;
    let code = verified["backupCodes"][0].as_str().unwrap().to_string();

    let pre_mfa = |body: serde_json::Value| body["preMfaToken"].as_str().unwrap().to_string();

    let token = pre_mfa(response_json(login(&app, "owner@shop.example", ADMIN_PASSWORD).await).await);
    let first = app
        .request(
            Method::POST,
            "/api/admin-mfa/backup",
            Some(json!({ "preMfaToken": token, "code": code })),
        )
        .await;
    assert_eq!(first.status(), 200);
    assert_eq!(response_json(first).await["backupCodesRemaining"], 9);

    let token = pre_mfa(response_json(login(&app, "owner@shop.example", ADMIN_PASSWORD).await).await);
    let second = app
        .request(
            Method::POST,
            "/api/admin-mfa/backup",
            Some(json!({ "preMfaToken": token, "code": code })),
        )
        .await;
    assert_eq!(second.status(), 400);
    assert_eq!(response_json(second).await["message"], "Invalid backup code");
}

#[tokio::test]
async fn refresh_tokens_rotate_and_cannot_be_replayed() {
    let app = TestApp::new().await;
    let (session, _) = app.enrolled_admin("owner@shop.example", "admin").await;

    let refreshed = app
        .request_with_headers(Method::POST, "/api/admin-refresh", None, &[cookie_header(&session)])
        .await;
    assert_eq!(refreshed.status(), 200);
    let rotated = SessionCookies::from_response(&refreshed);
    assert_ne!(rotated.refresh, session.refresh);

    let replay = app
        .request_with_headers(Method::POST, "/api/admin-refresh", None, &[cookie_header(&session)])
        .await;
    assert_eq!(replay.status(), 401);

    let next = app
        .request_with_headers(Method::POST, "/api/admin-refresh", None, &[cookie_header(&rotated)])
        .await;
    assert_eq!(next.status(), 200);
}

#[tokio::test]
async fn logout_revokes_the_refresh_token_and_clears_cookies() {
    let app = TestApp::new().await;
    let (session, _) = app.enrolled_admin("owner@shop.example", "admin").await;

    let logout = app
        .request_with_headers(
            Method::DELETE,
            "/api/admin-auth",
            None,
            &[
                cookie_header(&session),
                (cookies::CSRF_HEADER, session.csrf.clone()),
            ],
        )
        .await;
    assert_eq!(logout.status(), 200);
    let cleared: Vec<String> = logout
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cleared.len(), 3);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));

    let refresh = app
        .request_with_headers(Method::POST, "/api/admin-refresh", None, &[cookie_header(&session)])
        .await;
    assert_eq!(refresh.status(), 401);
}

#[tokio::test]
async fn cookie_sessions_need_the_csrf_header_to_mutate() {
    let app = TestApp::new().await;
    let (session, _) = app.enrolled_admin("owner@shop.example", "admin").await;

    let without = app
        .request_with_headers(
            Method::POST,
            "/api/admin-mfa/regenerate",
            Some(json!({ "code": "123456" })),
            &[cookie_header(&session)],
        )
        .await;
    assert_eq!(without.status(), 401);

    let mismatched = app
        .request_with_headers(
            Method::POST,
            "/api/admin-mfa/regenerate",
            Some(json!({ "code": "123456" })),
            &[cookie_header(&session), (cookies::CSRF_HEADER, "forged".to_string())],
        )
        .await;
    assert_eq!(mismatched.status(), 401);

    // reads do not need the header
    let read = app
        .request_with_headers(Method::GET, "/api/admin-mfa/status", None, &[cookie_header(&session)])
        .await;
    assert_eq!(read.status(), 200);
}

#[tokio::test]
async fn unauthenticated_admin_requests_are_refused() {
    let app = TestApp::new().await;

    let verify = app.request(Method::GET, "/api/admin-auth", None).await;
    assert_eq!(verify.status(), 401);

    let audit = app.request(Method::GET, "/api/admin-audit", None).await;
    assert_eq!(audit.status(), 401);

    let forged = app
        .request_bearer(Method::GET, "/api/admin-mfa/status", None, "not-a-token")
        .await;
    assert_eq!(forged.status(), 401);
}

async fn paid_order(app: &TestApp) -> order::Model {
    app.seed_product(1, "Linen Apron", 1250, 5).await;
    app.request(
        Method::POST,
        "/api/stripe-checkout",
        Some(json!({ "items": [cart_line(1, 2, 12.5)] })),
    )
    .await;
    let metadata = app.card.last_request().unwrap().metadata.to_map();
    let response = app
        .deliver_webhook(&completed_event("cs_test_1", "pi_1", 2500, &metadata))
        .await;
    assert_eq!(response.status(), 200);
    order::Entity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn admins_move_orders_along_their_lifecycle() {
    let app = TestApp::new().await;
    let (session, _) = app.enrolled_admin("owner@shop.example", "admin").await;
    let placed = paid_order(&app).await;
    let uri = format!("/api/admin-orders/{}/status", placed.id);

    let shipped = app
        .request_bearer(Method::PATCH, &uri, Some(json!({ "status": "shipped" })), &session.access)
        .await;
    assert_eq!(shipped.status(), 200);
    let body = response_json(shipped).await;
    assert_eq!(body["status"], "shipped");
    assert_eq!(body["customerEmail"], "buyer@example.com");
    assert_eq!(body["shippingAddress"]["city"], "York");

    // no stepping backwards
    let skipped = app
        .request_bearer(Method::PATCH, &uri, Some(json!({ "status": "paid" })), &session.access)
        .await;
    assert_eq!(skipped.status(), 400);

    let unknown = app
        .request_bearer(Method::PATCH, &uri, Some(json!({ "status": "lost" })), &session.access)
        .await;
    assert_eq!(unknown.status(), 400);

    let stored = order::Entity::find_by_id(placed.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Shipped);

    let audit = app
        .request_bearer(Method::GET, "/api/admin-audit?limit=50", None, &session.access)
        .await;
    assert_eq!(audit.status(), 200);
    let entries = response_json(audit).await["entries"].clone();
    let actions: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert!(actions.contains(&"ORDER_STATUS_CHANGED"));
    assert!(actions.contains(&"MFA_ENABLED"));
}

#[tokio::test]
async fn viewers_cannot_change_orders() {
    let app = TestApp::new().await;
    let (session, _) = app.enrolled_admin("viewer@shop.example", "viewer").await;
    let placed = paid_order(&app).await;

    let response = app
        .request_bearer(
            Method::PATCH,
            &format!("/api/admin-orders/{}/status", placed.id),
            Some(json!({ "status": "shipped" })),
            &session.access,
        )
        .await;
    assert_eq!(response.status(), 403);
    assert_eq!(
        response_json(response).await["message"],
        "Insufficient permissions"
    );
}

#[tokio::test]
async fn allowlist_blocks_admin_routes_only() {
    let app = TestApp::with_config(|cfg| {
        cfg.admin_allowed_ips = Some("10.0.0.1".into());
    })
    .await;

    let blocked = app
        .request_with_headers(
            Method::POST,
            "/api/admin-auth",
            Some(json!({ "email": "a@b.co", "password": "x" })),
            &[("x-forwarded-for", "203.0.113.9, 10.0.0.1".to_string())],
        )
        .await;
    assert_eq!(blocked.status(), 403);
    assert_eq!(response_json(blocked).await["message"], "Access denied");

    let allowed = app
        .request_with_headers(
            Method::POST,
            "/api/admin-auth",
            Some(json!({ "email": "a@b.co", "password": "x" })),
            &[("x-forwarded-for", "10.0.0.1".to_string())],
        )
        .await;
    assert_eq!(allowed.status(), 401);

    let public = app
        .request_with_headers(
            Method::GET,
            "/api/orders?order_number=FS-20260101-0001",
            None,
            &[("x-forwarded-for", "203.0.113.9".to_string())],
        )
        .await;
    assert_eq!(public.status(), 404);
}
