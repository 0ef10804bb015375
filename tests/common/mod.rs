#![allow(dead_code)]

use bytes::Bytes;
use homegate::config::{BackendEndpoint, BackendRole, Config};
use homegate::store::MemoryStore;
use homegate::test_utils::{create_test_config, endpoints};
use homegate::{Gateway, SESSION_COOKIE_NAME, serve};
use http_body_util::Full;
use hyper::Response;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use homegate::test_utils::{MockBackend, dead_endpoint, spawn_backend};

pub fn reply(status: u16, content_type: &str, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("server", "express")
        .header("x-powered-by", "Express")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

pub fn json_reply(status: u16, body: &str) -> Response<Full<Bytes>> {
    reply(status, "application/json", body)
}

/// Backend implementing the auth routes: the password "right" logs in.
pub async fn spawn_auth_backend() -> MockBackend {
    spawn_backend(|req| {
        let body: Value = serde_json::from_slice(req.body()).unwrap_or_default();
        match req.uri().path() {
            "/api/auth/login" if body["password"] == "right" => Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .header("set-cookie", "backend_sid=abc; Path=/; HttpOnly")
                .body(Full::new(Bytes::from_static(
                    br#"{"message":"Login successful","user":{"device_id":"hub-1"}}"#,
                )))
                .unwrap(),
            "/api/auth/login" => json_reply(401, r#"{"message":"Invalid credentials"}"#),
            "/api/auth/logout" => json_reply(200, r#"{"message":"Logged out"}"#),
            "/api/users/me" => {
                let cookie = req
                    .headers()
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body = serde_json::json!({ "email": "a@b.com", "cookie": cookie });
                json_reply(200, &body.to_string())
            }
            _ => json_reply(200, r#"{"status":"ok"}"#),
        }
    })
    .await
}

/// Test configuration with the given primaries followed by the fallbacks.
pub fn gateway_config(primaries: &[String], fallbacks: &[String]) -> Arc<Config> {
    let timeout = Duration::from_millis(500);
    let mut backends = endpoints(primaries, timeout);
    backends.extend(endpoints(fallbacks, timeout).into_iter().map(|endpoint| {
        BackendEndpoint {
            role: BackendRole::Fallback,
            ..endpoint
        }
    }));

    let mut config = (*create_test_config()).clone();
    config.backends = backends;
    Arc::new(config)
}

pub struct TestGateway {
    pub base_url: String,
    pub shutdown: CancellationToken,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn spawn_gateway(config: Arc<Config>) -> TestGateway {
    let shutdown = CancellationToken::new();
    let gateway =
        Gateway::new(config.clone(), Arc::new(MemoryStore::new()), shutdown.clone()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(serve(listener, Arc::new(gateway), config, shutdown.clone()));
    TestGateway { base_url, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// `name=value` of the gateway session cookie set on a response.
pub fn session_cookie(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{SESSION_COOKIE_NAME}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub async fn login(
    client: &reqwest::Client,
    gateway: &TestGateway,
    email: &str,
    password: &str,
) -> reqwest::Response {
    client
        .post(format!("{}/api/auth/login", gateway.base_url))
        .header("content-type", "application/json")
        .body(serde_json::json!({ "email": email, "password": password }).to_string())
        .send()
        .await
        .unwrap()
}

pub async fn body_json(resp: reqwest::Response) -> Value {
    serde_json::from_str(&resp.text().await.unwrap()).unwrap()
}
