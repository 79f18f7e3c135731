use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use helpdesk_api::AppStateInner;
use helpdesk_api::config::{CookieConfig, TokenConfig};
use helpdesk_api::password::hash_password;
use helpdesk_api::routes::router;
use helpdesk_api::tokens::TokenService;
use helpdesk_db::Database;
use helpdesk_db::models::NewUser;
use helpdesk_types::Role;
use helpdesk_types::api::TokenKind;

const PASSWORD: &str = "correct-horse";

struct TestApp {
    router: Router,
    user_id: i64,
    support_id: i64,
}

fn token_config() -> TokenConfig {
    TokenConfig {
        access_secret: "http-test-access-secret".into(),
        refresh_secret: "http-test-refresh-secret".into(),
        access_ttl: Duration::from_secs(15 * 60),
        refresh_ttl: Duration::from_secs(14 * 24 * 3600),
    }
}

fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).unwrap())
}

fn add_user(db: &Database, username: &str, first: &str, last: &str, role: Role) -> i64 {
    let email = format!("{username}@local.test");
    db.create_user(&NewUser {
        username,
        email: &email,
        password_hash: password_hash(),
        first_name: first,
        last_name: last,
        phone: None,
        dept_name: None,
        role,
    })
    .unwrap()
}

fn app() -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let user_id = add_user(&db, "user1", "Ivan", "Petrov", Role::User);
    add_user(&db, "user2", "Olga", "Smirnova", Role::User);
    let support_id = add_user(&db, "admin", "Marina", "Shpegel", Role::Support);

    let tokens = TokenService::new(&token_config()).unwrap();
    let state = AppStateInner::new(db, tokens, CookieConfig::default());
    TestApp {
        router: router(state),
        user_id,
        support_id,
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn set_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    /// `name=value` part of the Set-Cookie header, ready to send back.
    fn cookie_pair(&self) -> String {
        let raw = self.set_cookie().expect("no Set-Cookie header");
        raw.split(';').next().unwrap().to_string()
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> Reply {
    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        headers,
        body,
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn with_cookie(method: &str, uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

async fn login(app: &TestApp, login: &str) -> Reply {
    send(
        app,
        request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "login": login, "password": PASSWORD })),
        ),
    )
    .await
}

async fn access_token(app: &TestApp, who: &str) -> String {
    let reply = login(app, who).await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.body["accessToken"].as_str().unwrap().to_string()
}

// -- Token service over HTTP --

#[tokio::test]
async fn login_returns_access_token_and_sets_refresh_cookie() {
    let app = app();
    let reply = login(&app, "user1").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(!reply.body["accessToken"].as_str().unwrap().is_empty());
    assert!(reply.body.get("refreshToken").is_none());
    assert_eq!(reply.body["user"]["id"], app.user_id);
    assert_eq!(reply.body["user"]["role"], "user");
    assert_eq!(reply.body["user"]["name"], "Ivan Petrov");

    let cookie = reply.set_cookie().unwrap();
    assert!(cookie.starts_with("refresh_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=1209600"));
}

#[tokio::test]
async fn login_accepts_email() {
    let app = app();
    let reply = login(&app, "admin@local.test").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["role"], "support");
}

#[tokio::test]
async fn wrong_password_is_401_without_cookie() {
    let app = app();
    let reply = send(
        &app,
        request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "login": "user1", "password": "nope" })),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.set_cookie().is_none());
    assert_eq!(reply.body["error"], "unauthorized");

    let unknown = login(&app, "ghost").await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_login_body_is_400() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    assert_eq!(send(&app, req).await.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refresh_issues_new_access_token() {
    let app = app();
    let cookie = login(&app, "user1").await.cookie_pair();

    let reply = send(&app, with_cookie("POST", "/auth/refresh", &cookie)).await;
    assert_eq!(reply.status, StatusCode::OK);
    let token = reply.body["accessToken"].as_str().unwrap();

    let me = send(&app, request("GET", "/auth/me", Some(token), None)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["user"]["username"], "user1");

    let missing = send(&app, request("POST", "/auth/refresh", None, None)).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rejects_access_token_in_cookie() {
    let app = app();
    let access = access_token(&app, "user1").await;
    let cookie = format!("refresh_token={access}");
    let reply = send(&app, with_cookie("POST", "/auth/refresh", &cookie)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_clears_cookie_and_revokes_refresh_token() {
    let app = app();
    let cookie = login(&app, "user1").await.cookie_pair();

    let out = send(&app, with_cookie("POST", "/auth/logout", &cookie)).await;
    assert_eq!(out.status, StatusCode::OK);
    assert_eq!(out.body, json!({ "ok": true }));
    let cleared = out.set_cookie().unwrap();
    assert!(cleared.starts_with("refresh_token=;"));
    assert!(cleared.contains("Max-Age=0"));

    let again = send(&app, with_cookie("POST", "/auth/refresh", &cookie)).await;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_without_cookie_still_clears() {
    let app = app();
    let out = send(&app, request("POST", "/auth/logout", None, None)).await;
    assert_eq!(out.status, StatusCode::OK);
    assert!(out.set_cookie().unwrap().contains("Max-Age=0"));
}

// -- Session boundary --

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let app = app();

    let none = send(&app, request("GET", "/tickets/my", None, None)).await;
    assert_eq!(none.status, StatusCode::UNAUTHORIZED);

    let wrong_scheme = Request::builder()
        .uri("/tickets/my")
        .header(header::AUTHORIZATION, "Token abc")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, wrong_scheme).await.status, StatusCode::UNAUTHORIZED);

    let garbage = send(&app, request("GET", "/tickets/my", Some("abc.def.ghi"), None)).await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_access_token_is_401_and_refresh_recovers() {
    let app = app();
    let cookie = login(&app, "user1").await.cookie_pair();

    let tokens = TokenService::new(&token_config()).unwrap();
    let stale = tokens
        .issue_at(
            TokenKind::Access,
            app.user_id,
            Role::User,
            Utc::now() - chrono::Duration::hours(1),
        )
        .unwrap();

    let rejected = send(&app, request("GET", "/auth/me", Some(&stale.token), None)).await;
    assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);

    let refreshed = send(&app, with_cookie("POST", "/auth/refresh", &cookie)).await;
    let token = refreshed.body["accessToken"].as_str().unwrap();
    let me = send(&app, request("GET", "/auth/me", Some(token), None)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["user"]["id"], app.user_id);
}

#[tokio::test]
async fn refresh_token_is_not_an_access_token() {
    let app = app();
    let tokens = TokenService::new(&token_config()).unwrap();
    let refresh = tokens.issue(TokenKind::Refresh, app.user_id, Role::User).unwrap();
    let reply = send(&app, request("GET", "/auth/me", Some(&refresh.token), None)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

// -- Ticket lifecycle --

#[tokio::test]
async fn ticket_lifecycle_end_to_end() {
    let app = app();
    let user = access_token(&app, "user1").await;
    let support = access_token(&app, "admin").await;

    let created = send(
        &app,
        request(
            "POST",
            "/tickets",
            Some(&user),
            Some(json!({ "title": " Printer ", "description": "Jammed on tray 2", "priority": "" })),
        ),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let ticket = &created.body["ticket"];
    assert_eq!(ticket["title"], "Printer");
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["priority"], "medium");
    assert_eq!(ticket["ticketNumber"], "000001");
    assert_eq!(ticket["fromName"], "Ivan Petrov");
    assert!(ticket["assigneeId"].is_null());
    let id = ticket["id"].as_i64().unwrap();

    let listed = send(&app, request("GET", "/tickets?tab=new", Some(&support), None)).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body["tickets"].as_array().unwrap().len(), 1);

    let assigned = send(
        &app,
        request(
            "POST",
            &format!("/tickets/{id}/assign"),
            Some(&support),
            Some(json!({ "assigneeId": app.support_id })),
        ),
    )
    .await;
    assert_eq!(assigned.status, StatusCode::OK);
    assert_eq!(assigned.body["ticket"]["status"], "in_progress");
    assert_eq!(assigned.body["ticket"]["assigneeName"], "Marina Shpegel");

    let replied = send(
        &app,
        request(
            "POST",
            &format!("/tickets/{id}/reply"),
            Some(&support),
            Some(json!({ "assigneeId": app.support_id, "reply": "Replaced the roller" })),
        ),
    )
    .await;
    assert_eq!(replied.status, StatusCode::OK);
    assert_eq!(replied.body["ticket"]["supportReply"], "Replaced the roller");
    assert!(!replied.body["ticket"]["repliedAt"].is_null());

    let posted = send(
        &app,
        request(
            "POST",
            &format!("/tickets/{id}/messages"),
            Some(&support),
            Some(json!({ "message": "Please confirm" })),
        ),
    )
    .await;
    assert_eq!(posted.status, StatusCode::NO_CONTENT);
    assert!(posted.body.is_null());

    let answered = send(
        &app,
        request(
            "POST",
            &format!("/tickets/my/{id}/messages"),
            Some(&user),
            Some(json!({ "message": "Works now" })),
        ),
    )
    .await;
    assert_eq!(answered.status, StatusCode::NO_CONTENT);

    let closed = send(&app, request("POST", &format!("/tickets/{id}/close"), Some(&support), None)).await;
    assert_eq!(closed.status, StatusCode::OK);
    assert_eq!(closed.body["ticket"]["status"], "closed");
    assert!(!closed.body["ticket"]["closedAt"].is_null());

    // A reply after closing does not reopen the ticket.
    let late = send(
        &app,
        request(
            "POST",
            &format!("/tickets/{id}/reply"),
            Some(&support),
            Some(json!({ "assigneeId": app.support_id, "reply": "One more thing" })),
        ),
    )
    .await;
    assert_eq!(late.status, StatusCode::OK);
    assert_eq!(late.body["ticket"]["status"], "closed");
    assert_eq!(late.body["ticket"]["supportReply"], "Replaced the roller");

    let mine = send(&app, request("GET", &format!("/tickets/my/{id}"), Some(&user), None)).await;
    assert_eq!(mine.status, StatusCode::OK);
    assert_eq!(mine.body["ticket"]["status"], "closed");

    let messages = send(&app, request("GET", &format!("/tickets/{id}/messages"), Some(&support), None)).await;
    let texts: Vec<&str> = messages.body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["Please confirm", "Works now"]);
    assert_eq!(messages.body["messages"][1]["author"], "Ivan Petrov");
}

#[tokio::test]
async fn roles_are_enforced() {
    let app = app();
    let user = access_token(&app, "user1").await;
    let support = access_token(&app, "admin").await;

    let list = send(&app, request("GET", "/tickets", Some(&user), None)).await;
    assert_eq!(list.status, StatusCode::FORBIDDEN);
    assert_eq!(list.body["error"], "forbidden");

    let create = send(
        &app,
        request(
            "POST",
            "/tickets",
            Some(&support),
            Some(json!({ "title": "t", "description": "d" })),
        ),
    )
    .await;
    assert_eq!(create.status, StatusCode::FORBIDDEN);

    let close = send(&app, request("POST", "/tickets/1/close", Some(&user), None)).await;
    assert_eq!(close.status, StatusCode::FORBIDDEN);

    let users = send(&app, request("GET", "/users/support", Some(&user), None)).await;
    assert_eq!(users.status, StatusCode::FORBIDDEN);

    let users = send(&app, request("GET", "/users/support", Some(&support), None)).await;
    assert_eq!(users.status, StatusCode::OK);
    assert_eq!(
        users.body["users"],
        json!([{ "id": app.support_id, "name": "Marina Shpegel" }])
    );
}

#[tokio::test]
async fn foreign_ticket_looks_missing_to_its_non_owner() {
    let app = app();
    let owner = access_token(&app, "user1").await;
    let other = access_token(&app, "user2").await;

    let created = send(
        &app,
        request(
            "POST",
            "/tickets",
            Some(&owner),
            Some(json!({ "title": "VPN", "description": "Cannot connect", "priority": "high" })),
        ),
    )
    .await;
    let id = created.body["ticket"]["id"].as_i64().unwrap();

    let peek = send(&app, request("GET", &format!("/tickets/my/{id}"), Some(&other), None)).await;
    assert_eq!(peek.status, StatusCode::NOT_FOUND);

    let theirs = send(&app, request("GET", "/tickets/my", Some(&other), None)).await;
    assert_eq!(theirs.body["tickets"], json!([]));
}

#[tokio::test]
async fn invalid_ticket_input_is_400() {
    let app = app();
    let user = access_token(&app, "user1").await;

    let empty = send(
        &app,
        request(
            "POST",
            "/tickets",
            Some(&user),
            Some(json!({ "title": "  ", "description": "d" })),
        ),
    )
    .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let priority = send(
        &app,
        request(
            "POST",
            "/tickets",
            Some(&user),
            Some(json!({ "title": "t", "description": "d", "priority": "urgent" })),
        ),
    )
    .await;
    assert_eq!(priority.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_ticket_is_404_for_support() {
    let app = app();
    let support = access_token(&app, "admin").await;

    let get = send(&app, request("GET", "/tickets/42", Some(&support), None)).await;
    assert_eq!(get.status, StatusCode::NOT_FOUND);

    let assign = send(
        &app,
        request(
            "POST",
            "/tickets/42/assign",
            Some(&support),
            Some(json!({ "assigneeId": app.support_id })),
        ),
    )
    .await;
    assert_eq!(assign.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_numeric_ticket_id_is_a_json_400() {
    let app = app();
    let support = access_token(&app, "admin").await;
    let user = access_token(&app, "user1").await;

    let get = send(&app, request("GET", "/tickets/abc", Some(&support), None)).await;
    assert_eq!(get.status, StatusCode::BAD_REQUEST);
    assert_eq!(get.body, json!({ "error": "bad ticket id" }));

    let close = send(&app, request("POST", "/tickets/1x/close", Some(&support), None)).await;
    assert_eq!(close.status, StatusCode::BAD_REQUEST);
    assert_eq!(close.body["error"], "bad ticket id");

    let mine = send(
        &app,
        request(
            "POST",
            "/tickets/my/abc/messages",
            Some(&user),
            Some(json!({ "message": "hi" })),
        ),
    )
    .await;
    assert_eq!(mine.status, StatusCode::BAD_REQUEST);
    assert_eq!(mine.body["error"], "bad ticket id");
}
