//! Best-effort LAN announcement so viewers can find the agent before
//! connecting. Payload: `NEONLINK:<ip>:<port>`, sent as a UDP broadcast.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::state::Shutdown;

pub const ANNOUNCE_PREFIX: &str = "NEONLINK";

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends nothing; it only selects a route.
pub fn local_ip() -> Option<IpAddr> {
    let sock = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    sock.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = sock.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

pub fn announcement(ip: IpAddr, port: u16) -> String {
    format!("{ANNOUNCE_PREFIX}:{ip}:{port}")
}

pub fn spawn_announcer(cfg: DiscoveryConfig, service_port: u16, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sock = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(s) => s,
            Err(e) => {
                warn!("discovery disabled, cannot bind udp socket: {e}");
                return;
            }
        };
        if let Err(e) = sock.set_broadcast(true) {
            warn!("discovery disabled, broadcast not permitted: {e}");
            return;
        }
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, cfg.port));
        let period = Duration::from_secs(cfg.interval_secs.max(1));
        info!(port = cfg.port, "announcing on the local network");

        loop {
            let ip = local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            let msg = announcement(ip, service_port);
            match sock.send_to(msg.as_bytes(), target).await {
                Ok(_) => debug!(%msg, "announced"),
                Err(e) => debug!("announce failed: {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.wait() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_format() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(announcement(ip, 9876), "NEONLINK:192.168.1.20:9876");
    }

    #[tokio::test]
    async fn announcer_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        let cfg = DiscoveryConfig {
            enabled: true,
            port: 0,
            interval_secs: 1,
        };
        let handle = spawn_announcer(cfg, 9876, shutdown.clone());
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
