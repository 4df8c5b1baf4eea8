//! Fan-out of snapshots to every client, plus the idle-connection reaper.

use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::Frame;
use crate::state::AppState;

/// Serialize each snapshot once and queue the shared frame for every client.
/// Ends when the channel is closed and drained.
pub fn spawn_broadcaster(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let snapshots = state.channel.subscribe();
        tokio::pin!(snapshots);
        while let Some(snap) = snapshots.next().await {
            let frame: Frame = match serde_json::to_string(&snap) {
                Ok(js) => Frame::from(js),
                Err(e) => {
                    warn!("failed to encode snapshot: {e}");
                    continue;
                }
            };
            let report = state.registry().broadcast(&frame);
            if report.removed > 0 || report.lagged > 0 {
                debug!(
                    delivered = report.delivered,
                    lagged = report.lagged,
                    removed = report.removed,
                    "broadcast"
                );
            }
        }
        info!("broadcaster stopped");
    })
}

pub fn reap_period(idle_timeout: Duration) -> Duration {
    (idle_timeout / 4).max(Duration::from_secs(1))
}

pub fn spawn_idle_reaper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let idle = state.config.server.idle_timeout();
        let mut tick = tokio::time::interval(reap_period(idle));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = state.shutdown.wait() => break,
            }
            let evicted = state.gate.cleanup_inactive(idle);
            if !evicted.is_empty() {
                info!(count = evicted.len(), "closed idle connections");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::types::SystemSnapshot;

    #[test]
    fn reap_period_has_a_floor() {
        assert_eq!(reap_period(Duration::from_secs(120)), Duration::from_secs(30));
        assert_eq!(reap_period(Duration::from_secs(2)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn frames_reach_clients_in_order() {
        let state = AppState::for_tests(AgentConfig::default());
        let (_a, mut rx_a) = state.gate.register_client(None, "127.0.0.1").unwrap();
        let (_b, mut rx_b) = state.gate.register_client(None, "10.0.0.2").unwrap();
        let handle = spawn_broadcaster(state.clone());

        for ts in 1..=3 {
            state.channel.write(SystemSnapshot::degraded(ts));
        }
        state.channel.close();
        handle.await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            for ts in 1..=3 {
                let frame = rx.recv().await.unwrap();
                let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
                assert_eq!(v["timestamp"], serde_json::json!(ts));
            }
        }
    }

    #[tokio::test]
    async fn dead_clients_are_dropped() {
        let state = AppState::for_tests(AgentConfig::default());
        let (gone, rx) = state.gate.register_client(None, "127.0.0.1").unwrap();
        drop(rx);
        let handle = spawn_broadcaster(state.clone());
        state.channel.write(SystemSnapshot::degraded(1));
        state.channel.close();
        handle.await.unwrap();
        assert_eq!(state.gate.connected_count(), 0);
        assert_eq!(gone.close_reason(), Some("Send failed"));
    }
}
