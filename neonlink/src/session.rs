//! The watch loop: print what the agent streams, optionally send one command,
//! and keep the session alive with periodic pings.

use anyhow::{bail, Result};
use std::io::Write;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::summary::{reply_line, snapshot_line};
use crate::types::Event;
use crate::ws::{next_event, send_command, WsStream};

/// Default heartbeat; well inside the agent's default idle window.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub command: Option<String>,
    pub params: Vec<(String, String)>,
    /// Snapshots to print before returning; 0 means until the agent closes.
    pub count: usize,
    pub json: bool,
    /// `None` disables heartbeats.
    pub heartbeat: Option<Duration>,
}

enum Step {
    Event(Option<Event>),
    Beat,
}

pub async fn watch(ws: &mut WsStream, opts: &WatchOptions, out: &mut impl Write) -> Result<()> {
    if let Some(name) = &opts.command {
        send_command(ws, name, &opts.params).await?;
    }
    let mut awaiting_reply = opts.command.clone();
    let mut heartbeats_in_flight = 0usize;
    let mut printed = 0usize;

    let period = opts.heartbeat.filter(|p| !p.is_zero());
    let mut beat = period.map(|p| {
        let mut i = interval_at(Instant::now() + p, p);
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    });

    loop {
        let step = tokio::select! {
            ev = next_event(ws) => Step::Event(ev?),
            _ = async {
                match beat.as_mut() {
                    Some(b) => { b.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => Step::Beat,
        };

        let event = match step {
            Step::Beat => {
                send_command(ws, "ping", &[]).await?;
                heartbeats_in_flight += 1;
                continue;
            }
            Step::Event(None) => {
                eprintln!("agent closed the connection");
                return Ok(());
            }
            Step::Event(Some(ev)) => ev,
        };

        match event {
            Event::Reply(r) if r.command == "connected" => {
                if opts.json {
                    writeln!(out, "{}", serde_json::to_string(&r.result)?)?;
                }
            }
            Event::Reply(r) => {
                let answered = awaiting_reply
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(&r.command));
                // replies come back in request order, so the user's own ping
                // is answered before any heartbeat sent after it
                if !answered && r.command == "ping" && heartbeats_in_flight > 0 {
                    heartbeats_in_flight -= 1;
                    continue;
                }
                writeln!(out, "{}", reply_line(&r))?;
                if answered {
                    awaiting_reply = None;
                    if opts.count == 0 {
                        if !r.success {
                            bail!("command failed");
                        }
                        return Ok(());
                    }
                }
            }
            Event::Snapshot(s) => {
                if opts.command.is_some() && opts.count == 0 {
                    continue;
                }
                if opts.json {
                    writeln!(out, "{}", serde_json::to_string(&s)?)?;
                } else {
                    writeln!(out, "{}", snapshot_line(&s))?;
                }
                printed += 1;
                if opts.count > 0 && printed >= opts.count && awaiting_reply.is_none() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::{agent_url, connect};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    const SNAPSHOT: &str = r#"{"timestamp":7,"cpu":{"usage":10},"ram":{"used":1,"total":2,"usedPercent":50},"adminLevel":"Full"}"#;

    fn pong() -> String {
        r#"{"success":true,"command":"ping","result":{"pong":true},"error":null,"timestamp":7}"#
            .to_string()
    }

    // Answers pings; sends one snapshot only after `pings` heartbeats arrived.
    async fn fake_agent(pings: usize) -> (String, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let mut seen = 0;
            while seen < pings {
                match ws.next().await {
                    Some(Ok(Message::Text(t))) if t.contains(r#""command":"ping""#) => {
                        seen += 1;
                        ws.send(Message::Text(pong())).await.unwrap();
                    }
                    Some(Ok(_)) => {}
                    _ => return seen,
                }
            }
            ws.send(Message::Text(SNAPSHOT.into())).await.unwrap();
            // hold the socket until the viewer is done with it
            while let Some(Ok(_)) = ws.next().await {}
            seen
        });
        (url, handle)
    }

    #[tokio::test]
    async fn heartbeats_keep_flowing_and_stay_quiet() {
        let (url, agent) = fake_agent(2).await;
        let mut ws = connect(&agent_url(&url, None).unwrap()).await.unwrap();
        let opts = WatchOptions {
            count: 1,
            heartbeat: Some(Duration::from_millis(50)),
            ..WatchOptions::default()
        };
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), watch(&mut ws, &opts, &mut out))
            .await
            .expect("watch finished")
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1, "only the snapshot is printed: {text}");
        assert!(text.contains("CPU  10.0%"));
        drop(ws);
        assert_eq!(agent.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn explicit_ping_is_reported() {
        let (url, agent) = fake_agent(1).await;
        let mut ws = connect(&agent_url(&url, None).unwrap()).await.unwrap();
        let opts = WatchOptions {
            command: Some("ping".into()),
            heartbeat: Some(Duration::from_secs(60)),
            ..WatchOptions::default()
        };
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), watch(&mut ws, &opts, &mut out))
            .await
            .expect("watch finished")
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), r#"ping ok: {"pong":true}"#);
        drop(ws);
        assert_eq!(agent.await.unwrap(), 1);
    }
}
