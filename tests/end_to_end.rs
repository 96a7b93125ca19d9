//! End-to-end tests over the HTTP router and a live WebSocket server
//!
//! REST calls go through `oneshot`; WebSocket tests bind a real listener
//! on localhost and connect with tokio-tungstenite.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;
use uuid::Uuid;

use quickconsult::auth::{Identity, Role};
use quickconsult::http_server::build_router;

use common::{sign_assertion, Fixture};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Helpers
// =============================================================================

fn router(f: &Fixture) -> Router {
    build_router(f.state.clone(), &f.config.server)
}

struct Reply {
    status: StatusCode,
    cookies: Vec<String>,
    body: Value,
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("access_token={}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookies = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    Reply {
        status,
        cookies,
        body,
    }
}

async fn create_consultation(router: &Router, client_token: &str, expert: &Identity) -> Uuid {
    let reply = call(
        router,
        Method::POST,
        "/api/v1/sessions",
        Some(client_token),
        Some(json!({ "expert_id": expert.id, "initial_message": "Need AWS help" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    reply.body["id"].as_str().unwrap().parse().unwrap()
}

async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn ws_connect(addr: SocketAddr, consultation_id: Uuid, token: Option<&str>) -> Ws {
    let mut request = format!("ws://{}/api/v1/sessions/ws/{}", addr, consultation_id)
        .into_client_request()
        .unwrap();
    if let Some(token) = token {
        request.headers_mut().insert(
            "cookie",
            HeaderValue::from_str(&format!("access_token={}", token)).unwrap(),
        );
    }
    let (stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    stream
}

async fn next_message(ws: &mut Ws) -> WsMessage {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_json(ws: &mut Ws) -> Value {
    match next_message(ws).await {
        WsMessage::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

async fn close_code(ws: &mut Ws) -> u16 {
    match next_message(ws).await {
        WsMessage::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close frame, got {:?}", other),
    }
}

async fn send_content(ws: &mut Ws, content: &str) {
    let frame = json!({ "content": content }).to_string();
    ws.send(WsMessage::Text(frame.into())).await.unwrap();
}

// =============================================================================
// REST
// =============================================================================

#[tokio::test]
async fn test_health() {
    let f = Fixture::new();
    let reply = call(&router(&f), Method::GET, "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
}

#[tokio::test]
async fn test_federate_sets_http_only_cookies() {
    let f = Fixture::new();
    let router = router(&f);
    let assertion = sign_assertion("google", "g-77", "Jack@Example.com", Some("Jack"));

    let reply = call(
        &router,
        Method::POST,
        "/api/v1/auth/federate",
        None,
        Some(json!({ "assertion": assertion })),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["token_type"], "bearer");
    assert_eq!(reply.body["user"]["email"], "jack@example.com");
    assert_eq!(reply.body["user"]["role"], "client");

    let access = reply
        .cookies
        .iter()
        .find(|c| c.starts_with("access_token="))
        .expect("access cookie");
    assert!(access.contains("HttpOnly"));
    assert!(reply.cookies.iter().any(|c| c.starts_with("refresh_token=")));

    // The cookie token authenticates
    let token = reply.body["access_token"].as_str().unwrap();
    let session = call(&router, Method::GET, "/api/v1/auth/session", Some(token), None).await;
    assert_eq!(session.status, StatusCode::OK);
    assert_eq!(session.body["email"], "jack@example.com");
}

#[tokio::test]
async fn test_bad_assertion_is_unauthorized() {
    let f = Fixture::new();
    let reply = call(
        &router(&f),
        Method::POST,
        "/api/v1/auth/federate",
        None,
        Some(json!({ "assertion": "not-a-token" })),
    )
    .await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], 401);
    assert!(reply.body["error"].is_string());
    assert!(reply.cookies.is_empty());
}

#[tokio::test]
async fn test_session_requires_credentials() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);

    let anonymous = call(&router, Method::GET, "/api/v1/auth/session", None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    // Bearer header works too
    let request = Request::builder()
        .uri("/api/v1/auth/session")
        .header(header::AUTHORIZATION, format!("Bearer {}", f.access_token(&client)))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A refresh token is not an access token
    let pair = f.state.credentials.issue(client.id, client.role).unwrap();
    let wrong = call(
        &router,
        Method::GET,
        "/api/v1/auth/session",
        Some(&pair.refresh_token),
        None,
    )
    .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_from_body() {
    let f = Fixture::new();
    let router = router(&f);
    let expert = f.identity("expert@example.com", Role::Expert);
    let pair = f.state.credentials.issue(expert.id, expert.role).unwrap();

    let reply = call(
        &router,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": pair.refresh_token })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["id"], expert.id.to_string());
    assert!(reply.cookies.iter().any(|c| c.starts_with("access_token=")));

    let misuse = call(
        &router,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": pair.access_token })),
    )
    .await;
    assert_eq!(misuse.status, StatusCode::UNAUTHORIZED);

    let missing = call(&router, Method::POST, "/api/v1/auth/refresh", None, None).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_cookies() {
    let f = Fixture::new();
    let reply = call(&router(&f), Method::POST, "/api/v1/auth/logout", None, None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "success");
    assert!(reply.cookies.iter().any(|c| c.starts_with("access_token=")));
    assert!(reply.cookies.iter().any(|c| c.starts_with("refresh_token=")));
}

#[tokio::test]
async fn test_created_consultation_reads_back_identically() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);
    let expert = f.identity("expert@example.com", Role::Expert);
    let token = f.access_token(&client);

    let created = call(
        &router,
        Method::POST,
        "/api/v1/sessions",
        Some(&token),
        Some(json!({ "expert_id": expert.id, "initial_message": "Need AWS help" })),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);

    let id = created.body["id"].as_str().unwrap();
    let fetched = call(&router, Method::GET, &format!("/api/v1/sessions/{}", id), Some(&token), None).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body, created.body);
}

#[tokio::test]
async fn test_consultation_rest_flow() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);
    let expert = f.identity("expert@example.com", Role::Expert);
    let outsider = f.identity("outsider@example.com", Role::Client);
    let client_token = f.access_token(&client);
    let expert_token = f.access_token(&expert);

    let id = create_consultation(&router, &client_token, &expert).await;

    let fetched = call(
        &router,
        Method::GET,
        &format!("/api/v1/sessions/{}", id),
        Some(&expert_token),
        None,
    )
    .await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body["status"], "active");
    assert_eq!(fetched.body["messages"][0]["content"], "Need AWS help");

    let denied = call(
        &router,
        Method::GET,
        &format!("/api/v1/sessions/{}", id),
        Some(&f.access_token(&outsider)),
        None,
    )
    .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let missing = call(
        &router,
        Method::GET,
        &format!("/api/v1/sessions/{}", Uuid::new_v4()),
        Some(&expert_token),
        None,
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let active = call(
        &router,
        Method::GET,
        "/api/v1/sessions/my/active?limit=5",
        Some(&expert_token),
        None,
    )
    .await;
    assert_eq!(active.body.as_array().unwrap().len(), 1);

    let closed = call(
        &router,
        Method::POST,
        &format!("/api/v1/sessions/{}/close", id),
        Some(&client_token),
        None,
    )
    .await;
    assert_eq!(closed.status, StatusCode::OK);

    let again = call(
        &router,
        Method::POST,
        &format!("/api/v1/sessions/{}/close", id),
        Some(&expert_token),
        None,
    )
    .await;
    assert_eq!(again.status, StatusCode::CONFLICT);

    let completed = call(
        &router,
        Method::GET,
        "/api/v1/sessions/my/completed",
        Some(&client_token),
        None,
    )
    .await;
    let completed = completed.body.as_array().unwrap().clone();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["status"], "completed");
    assert!(completed[0]["ended_at"].is_string());
}

#[tokio::test]
async fn test_create_rejects_non_expert() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);
    let other = f.identity("other@example.com", Role::Client);

    let reply = call(
        &router,
        Method::POST,
        "/api/v1/sessions",
        Some(&f.access_token(&client)),
        Some(json!({ "expert_id": other.id, "initial_message": "Hello" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// WebSocket
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_consultation() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);
    let expert = f.identity("expert@example.com", Role::Expert);
    let client_token = f.access_token(&client);
    let expert_token = f.access_token(&expert);

    let id = create_consultation(&router, &client_token, &expert).await;
    let addr = spawn_server(router.clone()).await;

    let mut client_ws = ws_connect(addr, id, Some(&client_token)).await;
    let seed = next_json(&mut client_ws).await;
    assert_eq!(seed["content"], "Need AWS help");

    let mut expert_ws = ws_connect(addr, id, Some(&expert_token)).await;
    let history = next_json(&mut expert_ws).await;
    assert_eq!(history, seed);

    send_content(&mut client_ws, "Budget is $5k").await;
    let to_client = next_json(&mut client_ws).await;
    let to_expert = next_json(&mut expert_ws).await;
    assert_eq!(to_client, to_expert);
    assert_eq!(to_client["content"], "Budget is $5k");
    assert_eq!(to_client["sender_id"], client.id.to_string());
    assert_eq!(to_client["kind"], "ordinary");

    let view = call(
        &router,
        Method::GET,
        &format!("/api/v1/sessions/{}", id),
        Some(&expert_token),
        None,
    )
    .await;
    let messages = view.body["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["id"], to_client["id"]);

    // Malformed frames are answered, not fatal
    expert_ws
        .send(WsMessage::Text("not json".to_string().into()))
        .await
        .unwrap();
    let error = next_json(&mut expert_ws).await;
    assert_eq!(error["error"]["code"], "INVALID_FRAME");

    // Closing over REST reaches both sockets
    let closed = call(
        &router,
        Method::POST,
        &format!("/api/v1/sessions/{}/close", id),
        Some(&expert_token),
        None,
    )
    .await;
    assert_eq!(closed.status, StatusCode::OK);

    let notice_client = next_json(&mut client_ws).await;
    let notice_expert = next_json(&mut expert_ws).await;
    assert_eq!(notice_client, notice_expert);
    assert_eq!(notice_client["kind"], "system");

    send_content(&mut expert_ws, "One more thing").await;
    let rejected = next_json(&mut expert_ws).await;
    assert_eq!(rejected["error"]["code"], "SESSION_CLOSED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_close_codes() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);
    let expert = f.identity("expert@example.com", Role::Expert);
    let outsider = f.identity("outsider@example.com", Role::Expert);
    let client_token = f.access_token(&client);

    let id = create_consultation(&router, &client_token, &expert).await;
    let addr = spawn_server(router.clone()).await;

    let mut anonymous = ws_connect(addr, id, None).await;
    assert_eq!(close_code(&mut anonymous).await, 4001);

    let mut garbage = ws_connect(addr, id, Some("garbage")).await;
    assert_eq!(close_code(&mut garbage).await, 4001);

    let mut intruder = ws_connect(addr, id, Some(&f.access_token(&outsider))).await;
    assert_eq!(close_code(&mut intruder).await, 4003);

    let mut lost = ws_connect(addr, Uuid::new_v4(), Some(&client_token)).await;
    assert_eq!(close_code(&mut lost).await, 4004);

    f.state.connections.close(id, client.id).unwrap();
    let mut late = ws_connect(addr, id, Some(&client_token)).await;
    assert_eq!(close_code(&mut late).await, 4009);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_stalled_write_leaves_server_responsive() {
    let f = Fixture::new();
    let router = router(&f);
    let client = f.identity("client@example.com", Role::Client);
    let expert = f.identity("expert@example.com", Role::Expert);
    let client_token = f.access_token(&client);
    let expert_token = f.access_token(&expert);
    let id = create_consultation(&router, &client_token, &expert).await;
    let addr = spawn_server(router).await;

    let mut client_ws = ws_connect(addr, id, Some(&client_token)).await;
    assert_eq!(next_json(&mut client_ws).await["content"], "Need AWS help");

    // Hold the database write lock from outside the pool
    let blocker = rusqlite::Connection::open(&f.config.database.path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    send_content(&mut client_ws, "Budget is $5k").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The server's single worker still completes a new handshake
    let mut expert_ws = timeout(
        Duration::from_secs(2),
        ws_connect(addr, id, Some(&expert_token)),
    )
    .await
    .expect("handshake stalled behind a pending write");

    blocker.execute_batch("ROLLBACK").unwrap();
    drop(blocker);

    let live = next_json(&mut client_ws).await;
    assert_eq!(live["content"], "Budget is $5k");

    let first = next_json(&mut expert_ws).await;
    let second = next_json(&mut expert_ws).await;
    assert_eq!(first["content"], "Need AWS help");
    assert_eq!(second["content"], "Budget is $5k");
    assert_eq!(second["id"], live["id"]);
}
