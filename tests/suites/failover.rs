use crate::common::{
    body_json, client, dead_endpoint, gateway_config, json_reply, reply, spawn_backend,
    spawn_gateway,
};

#[tokio::test]
async fn test_fallback_answers_when_primary_down() {
    let fallback = spawn_backend(|_| json_reply(200, r#"{"status":"fallback"}"#)).await;
    let config = gateway_config(&[dead_endpoint().await], &[fallback.url.clone()]);
    let gateway = spawn_gateway(config).await;

    let resp = client()
        .get(format!("{}/api/health", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp).await["status"], "fallback");
    assert_eq!(fallback.hits(), 1);
}

#[tokio::test]
async fn test_fallback_only_skips_primary() {
    let primary = spawn_backend(|_| json_reply(200, r#"{"status":"primary"}"#)).await;
    let fallback = spawn_backend(|_| json_reply(200, r#"{"status":"fallback"}"#)).await;
    let mut config = (*gateway_config(&[primary.url.clone()], &[fallback.url.clone()])).clone();
    config.fallback_only = true;
    let gateway = spawn_gateway(std::sync::Arc::new(config)).await;

    let resp = client()
        .get(format!("{}/api/health", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["status"], "fallback");
    assert_eq!(primary.hits(), 0);
}

#[tokio::test]
async fn test_all_backends_down_returns_envelope() {
    let config = gateway_config(&[dead_endpoint().await], &[dead_endpoint().await]);
    let gateway = spawn_gateway(config).await;

    let resp = client()
        .post(format!("{}/api/auth/register", gateway.base_url))
        .header("content-type", "application/json")
        .body(r#"{"email":"n@b.com"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "backend_unreachable");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_malformed_backend_body_returns_envelope() {
    let backend = spawn_backend(|_| reply(200, "text/html", "<h1>Bad Gateway</h1>")).await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;

    let resp = client()
        .get(format!("{}/api/health", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    assert_eq!(body_json(resp).await["error"], "backend_unreachable");
}

#[tokio::test]
async fn test_backend_rejection_passes_through() {
    let backend =
        spawn_backend(|_| json_reply(409, r#"{"message":"Email already registered"}"#)).await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;

    let resp = client()
        .post(format!("{}/api/auth/register", gateway.base_url))
        .header("content-type", "application/json")
        .body(r#"{"email":"a@b.com"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    assert!(resp.headers().get("server").is_none());
    assert!(resp.headers().get("x-powered-by").is_none());
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["x-frame-options"], "DENY");
    assert_eq!(body_json(resp).await["message"], "Email already registered");
}

#[tokio::test]
async fn test_unknown_route_and_method() {
    let backend = spawn_backend(|_| json_reply(200, "{}")).await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    let resp = client
        .get(format!("{}/admin", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("{}/api/alerts", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let backend = spawn_backend(|_| json_reply(200, "{}")).await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;

    let resp = client()
        .post(format!("{}/api/password-resets/request", gateway.base_url))
        .header("content-type", "application/json")
        .body(format!(r#"{{"email":"{}"}}"#, "a".repeat(5000)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    assert_eq!(backend.hits(), 0);
}
