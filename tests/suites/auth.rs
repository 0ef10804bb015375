use crate::common::{
    body_json, client, dead_endpoint, gateway_config, login, session_cookie, spawn_auth_backend,
    spawn_gateway,
};
use homegate::SESSION_COOKIE_NAME;

#[tokio::test]
async fn test_lockout_after_five_failures() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    for _ in 0..5 {
        let resp = login(&client, &gateway, "a@b.com", "wrong").await;
        assert_eq!(resp.status(), 401);
        assert_eq!(body_json(resp).await["message"], "Invalid credentials");
    }
    assert_eq!(backend.hits(), 5);

    let resp = login(&client, &gateway, "a@b.com", "right").await;
    assert_eq!(resp.status(), 429);
    let retry_after: u64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((895..=900).contains(&retry_after));
    assert!(session_cookie(&resp).is_none());

    let body = body_json(resp).await;
    assert_eq!(body["error"], "too_many_attempts");
    assert_eq!(backend.hits(), 5);
}

#[tokio::test]
async fn test_lockout_is_per_identity() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    for _ in 0..5 {
        login(&client, &gateway, "a@b.com", "wrong").await;
    }
    let resp = login(&client, &gateway, "other@b.com", "right").await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_success_clears_failure_count() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    for _ in 0..4 {
        login(&client, &gateway, "a@b.com", "wrong").await;
    }
    assert_eq!(login(&client, &gateway, "a@b.com", "right").await.status(), 200);

    for _ in 0..4 {
        assert_eq!(login(&client, &gateway, "a@b.com", "wrong").await.status(), 401);
    }
    assert_eq!(backend.hits(), 9);
}

#[tokio::test]
async fn test_login_sets_session_cookie_and_passes_backend_cookie() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    let resp = login(&client, &gateway, "a@b.com", "right").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "no-store");

    let cookies: Vec<&str> = resp
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("backend_sid=abc")));

    let ours = cookies
        .iter()
        .find(|c| c.starts_with(SESSION_COOKIE_NAME))
        .unwrap();
    for attribute in ["HttpOnly", "Secure", "SameSite=Lax", "Max-Age=3600"] {
        assert!(ours.contains(attribute), "missing {attribute} in {ours}");
    }
}

#[tokio::test]
async fn test_session_lifecycle() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    let resp = client
        .get(format!("{}/api/auth/session", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(body_json(resp).await["logged_in"], false);

    let cookie = session_cookie(&login(&client, &gateway, "a@b.com", "right").await).unwrap();

    let resp = client
        .get(format!("{}/api/auth/session", gateway.base_url))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = body_json(resp).await;
    assert_eq!(body["logged_in"], true);
    assert_eq!(body["email"], "a@b.com");
    assert_eq!(body["device_id"], "hub-1");
    assert!(body["expires_in"].as_u64().unwrap() <= 3600);

    let resp = client
        .post(format!("{}/api/auth/logout", gateway.base_url))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cleared = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cleared.starts_with(&format!("{SESSION_COOKIE_NAME}=;")));
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_logout_succeeds_with_backend_down() {
    let gateway = spawn_gateway(gateway_config(&[dead_endpoint().await], &[])).await;

    let resp = client()
        .post(format!("{}/api/auth/logout", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["set-cookie"]
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );
}

#[tokio::test]
async fn test_logout_with_form_body_clears_session() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();
    let cookie = session_cookie(&login(&client, &gateway, "a@b.com", "right").await).unwrap();

    let resp = client
        .post(format!("{}/api/auth/logout", gateway.base_url))
        .header("cookie", &cookie)
        .header("content-type", "application/x-www-form-urlencoded")
        .body("logout=1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cleared = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cleared.starts_with(&format!("{SESSION_COOKIE_NAME}=;")));
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let backend = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[backend.url.clone()], &[])).await;
    let client = client();

    for path in ["/api/users/me", "/api/devices/status", "/api/alerts", "/api/sse/alerts"] {
        let resp = client
            .get(format!("{}{path}", gateway.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401, "{path}");
    }
    assert_eq!(backend.hits(), 0);

    let cookie = session_cookie(&login(&client, &gateway, "a@b.com", "right").await).unwrap();
    let resp = client
        .get(format!("{}/api/users/me", gateway.base_url))
        .header("cookie", format!("{cookie}; backend_sid=abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp).await["cookie"], "backend_sid=abc");
}
