use crate::common::{
    client, gateway_config, login, reply, session_cookie, spawn_auth_backend, spawn_backend,
    spawn_gateway,
};
use bytes::Bytes;
use std::time::Duration;

async fn next_chunk(resp: &mut reqwest::Response) -> Bytes {
    tokio::time::timeout(Duration::from_secs(5), resp.chunk())
        .await
        .expect("no event in time")
        .unwrap()
        .expect("stream ended")
}

/// Reads until `n` complete events have arrived.
async fn read_events(resp: &mut reqwest::Response, n: usize) -> Vec<String> {
    let mut buffer = String::new();
    loop {
        let events: Vec<String> = buffer
            .split_inclusive("\n\n")
            .filter(|e| e.ends_with("\n\n"))
            .map(str::to_string)
            .collect();
        if events.len() >= n {
            return events;
        }
        buffer.push_str(&String::from_utf8_lossy(&next_chunk(resp).await));
    }
}

#[tokio::test]
async fn test_event_stream_relays_and_reconnects() {
    let auth = spawn_auth_backend().await;
    let auth_gateway = spawn_gateway(gateway_config(&[auth.url.clone()], &[])).await;
    let client = client();
    let cookie = session_cookie(&login(&client, &auth_gateway, "a@b.com", "right").await).unwrap();

    let events = spawn_backend(|req| {
        if req.uri().path() == "/api/sse/alerts" {
            reply(
                200,
                "text/event-stream",
                "event: alert\ndata: {\"id\":1}\n\ndata: {\"id\":2}\n\n",
            )
        } else {
            reply(404, "application/json", "{}")
        }
    })
    .await;
    let gateway = spawn_gateway(gateway_config(&[events.url.clone()], &[])).await;

    let mut resp = client
        .get(format!("{}/api/sse/alerts", gateway.base_url))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["cache-control"], "no-cache");

    let received = read_events(&mut resp, 4).await;
    assert_eq!(received[0], "data: {\"id\":1}\n\n");
    assert_eq!(received[1], "data: {\"id\":2}\n\n");
    assert_eq!(received[2], "data: {\"error\":\"upstream stream closed\"}\n\n");
    assert_eq!(received[3], "data: {\"id\":1}\n\n");
    assert!(events.hits() >= 2);
}

#[tokio::test]
async fn test_event_stream_stops_when_client_leaves() {
    let auth = spawn_auth_backend().await;
    let gateway = spawn_gateway(gateway_config(&[auth.url.clone()], &[])).await;
    let client = client();
    let cookie = session_cookie(&login(&client, &gateway, "a@b.com", "right").await).unwrap();

    let mut resp = client
        .get(format!("{}/api/sse/alerts", gateway.base_url))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    // The auth backend answers JSON once and closes, so the relay keeps reconnecting.
    next_chunk(&mut resp).await;
    drop(resp);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let settled = auth.hits();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(auth.hits(), settled);
}
