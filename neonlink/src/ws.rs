//! Minimal WebSocket client for the agent: connect, send commands, read events.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::types::Event;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Agent URL with the optional access token appended as `?token=`.
pub fn agent_url(base: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid agent url: {base}"))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        anyhow::bail!("agent url must use ws:// or wss://, got {}", url.scheme());
    }
    if let Some(t) = token {
        url.query_pairs_mut().append_pair("token", t);
    }
    Ok(url)
}

pub async fn connect(url: &Url) -> Result<WsStream> {
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(ws)
}

pub fn command_json(name: &str, params: &[(String, String)]) -> String {
    let params: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    json!({ "command": name, "params": params }).to_string()
}

pub async fn send_command(ws: &mut WsStream, name: &str, params: &[(String, String)]) -> Result<()> {
    ws.send(Message::Text(command_json(name, params)))
        .await
        .context("sending command")
}

/// Next snapshot or reply. `None` once the agent closes the connection.
pub async fn next_event(ws: &mut WsStream) -> Result<Option<Event>> {
    while let Some(msg) = ws.next().await {
        match msg.context("reading from agent")? {
            Message::Text(t) => {
                if let Some(ev) = Event::parse(&t) {
                    return Ok(Some(ev));
                }
            }
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_goes_in_query() {
        let u = agent_url("ws://10.0.0.5:9876/ws", Some("a b")).unwrap();
        assert_eq!(u.as_str(), "ws://10.0.0.5:9876/ws?token=a+b");
        assert!(agent_url("http://x/ws", None).is_err());
        assert!(agent_url("not a url", None).is_err());
    }

    #[test]
    fn command_shape() {
        let js = command_json("set_polling_interval", &[("intervalMs".into(), "500".into())]);
        let v: Value = serde_json::from_str(&js).unwrap();
        assert_eq!(v["command"], "set_polling_interval");
        assert_eq!(v["params"]["intervalMs"], "500");
    }
}
