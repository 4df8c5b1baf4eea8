use neonlink::types::Event;
use neonlink::ws::{agent_url, connect, next_event, send_command};
use std::time::Duration;
use tokio::time::timeout;

// Integration probe: only runs when NEONLINK_WS is set to an agent WebSocket URL.
// Example: NEONLINK_WS=ws://127.0.0.1:9876/ws cargo test -p neonlink --test ws_probe -- --nocapture
#[tokio::test]
async fn probe_agent() {
    let base = match std::env::var("NEONLINK_WS") {
        Ok(v) if !v.is_empty() => v,
        _ => {
            eprintln!("skipping ws_probe: set NEONLINK_WS=ws://host:port/ws to run this integration test");
            return;
        }
    };
    let token = std::env::var("NEONLINK_TOKEN").ok();
    let url = agent_url(&base, token.as_deref()).expect("valid url");
    let mut ws = connect(&url).await.expect("connect ws");

    // the agent greets with its status
    match timeout(Duration::from_secs(5), next_event(&mut ws)).await {
        Ok(Ok(Some(Event::Reply(r)))) => assert_eq!(r.command, "connected"),
        other => panic!("expected connected message, got {other:?}"),
    }

    send_command(&mut ws, "ping", &[]).await.expect("send ping");
    let pong = timeout(Duration::from_secs(5), async {
        loop {
            match next_event(&mut ws).await {
                Ok(Some(Event::Reply(r))) if r.command == "ping" => return r,
                Ok(Some(_)) => continue,
                other => panic!("connection ended early: {other:?}"),
            }
        }
    })
    .await
    .expect("pong within timeout");
    assert!(pong.success);
}
