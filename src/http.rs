//! Local HTTP surface
//!
//! - `GET /ping` answers `{"status":"OK"}`, or echoes websocket frames
//!   back when the request asks for an upgrade
//! - `GET /info` identifies the device
//! - any other `GET` redirects the browser to the device page
//! - `OPTIONS` anywhere lists the allowed methods

use crate::context::Agent;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::{io, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

const DEVICE_PAGE: &str = "https://app.jacktrip.org/devices";
const ALLOWED: &str = "GET, OPTIONS";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Info {
    api_prefix: String,
    api_hash: String,
    mac: String,
}

pub fn router(agent: Arc<Agent>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(ping))
        .route("/info", get(info))
        .fallback(redirect)
        .layer(cors)
        .layer(middleware::from_fn(allow_header))
        .with_state(agent)
}

/// Serve until the agent is cancelled
pub async fn serve(agent: Arc<Agent>) -> io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], agent.settings.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    let token = agent.cancel.clone();
    axum::serve(listener, router(agent))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

async fn allow_header(req: Request, next: Next) -> Response {
    let options = req.method() == Method::OPTIONS;
    let mut res = next.run(req).await;
    if options {
        res.headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static(ALLOWED));
    }
    res
}

async fn ping(ws: Option<WebSocketUpgrade>) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(echo),
        None => Json(json!({ "status": "OK" })).into_response(),
    }
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!("echo socket closed");
}

async fn info(State(agent): State<Arc<Agent>>) -> Json<Info> {
    let creds = &agent.identity.credentials;
    Json(Info {
        api_prefix: creds.api_prefix.clone(),
        api_hash: creds.api_hash(),
        mac: agent.identity.mac.clone(),
    })
}

async fn redirect(State(agent): State<Arc<Agent>>, method: Method) -> Response {
    if method != Method::GET {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, ALLOWED)],
        )
            .into_response();
    }

    let creds = &agent.identity.credentials;
    let target = format!(
        "{}/{}?apiPrefix={}&apiHash={}",
        DEVICE_PAGE,
        agent.identity.mac,
        creds.api_prefix,
        creds.api_hash()
    );
    Redirect::to(&target).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::agent;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(method: Method, uri: &str) -> Response {
        let t = agent("USB Audio Device");
        let req = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router(t.agent.clone()).oneshot(req).await.unwrap()
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ping_without_upgrade() {
        let res = call(Method::GET, "/ping").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, json!({ "status": "OK" }));
    }

    #[tokio::test]
    async fn info_identifies_device() {
        let res = call(Method::GET, "/info").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["apiPrefix"], "ab");
        assert_eq!(body["mac"], "aa:bb:cc:dd:ee:ff");
        // sha256("cd")
        assert_eq!(
            body["apiHash"],
            "21e721c35a5823fdb452fa2f9f0a612c74fb952e06927489c6b27a43b817bed4"
        );
    }

    #[tokio::test]
    async fn everything_else_redirects() {
        let res = call(Method::GET, "/some/page").await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        let location = res.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://app.jacktrip.org/devices/aa:bb:cc:dd:ee:ff?apiPrefix=ab&apiHash="));
    }

    #[tokio::test]
    async fn options_lists_methods() {
        let res = call(Method::OPTIONS, "/anything").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ALLOW], ALLOWED);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn other_methods_are_refused() {
        let res = call(Method::POST, "/info").await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
