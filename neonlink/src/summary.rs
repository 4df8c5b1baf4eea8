//! One-line text rendering of snapshots and replies.

use chrono::{Local, TimeZone};

use crate::types::{Reply, Snapshot};

pub fn human_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut v = bytes_per_sec.max(0.0);
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    format!("{v:.1} {}", UNITS[unit])
}

fn clock(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn snapshot_line(s: &Snapshot) -> String {
    let mut line = format!(
        "[{}] CPU {:5.1}% {:4.0}C | GPU {:5.1}% {:4.0}C | RAM {:.1}/{:.1} GB ({:.0}%)",
        clock(s.timestamp),
        s.cpu.usage,
        s.cpu.temperature,
        s.gpu.usage,
        s.gpu.temperature,
        s.ram.used,
        s.ram.total,
        s.ram.used_percent,
    );
    if let Some(n) = &s.network {
        line.push_str(&format!(
            " | down {} up {}",
            human_rate(n.download),
            human_rate(n.upload)
        ));
        if n.ping >= 0 {
            line.push_str(&format!(" ping {} ms", n.ping));
        }
    }
    if let Some(g) = s.gaming.as_ref().filter(|g| g.active) {
        line.push_str(&format!(" | {:.0} fps", g.fps));
        if let Some(p) = &g.process {
            line.push_str(&format!(" ({p})"));
        }
    }
    if !s.admin_level.is_empty() {
        line.push_str(&format!(" | {}", s.admin_level));
    }
    line
}

pub fn reply_line(r: &Reply) -> String {
    match (&r.result, &r.error) {
        (_, Some(err)) if !r.success => format!("{} failed: {err}", r.command),
        (Some(v), _) => format!("{} ok: {v}", r.command),
        _ => format!("{} ok", r.command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    #[test]
    fn rates() {
        assert_eq!(human_rate(0.0), "0.0 B/s");
        assert_eq!(human_rate(1536.0), "1.5 KB/s");
        assert_eq!(human_rate(5.0 * 1024.0 * 1024.0), "5.0 MB/s");
        assert_eq!(human_rate(-3.0), "0.0 B/s");
    }

    #[test]
    fn snapshot_summary() {
        let text = r#"{"timestamp":0,"cpu":{"usage":50},"ram":{"used":8,"total":16,"usedPercent":50},
            "network":{"download":2048,"upload":0,"ping":-1,"localIp":""},
            "gaming":{"active":true,"fps":58.2,"process":"game.exe"},"adminLevel":"Limited"}"#;
        let Some(Event::Snapshot(s)) = Event::parse(text) else {
            panic!("not a snapshot")
        };
        let line = snapshot_line(&s);
        assert!(line.contains("CPU  50.0%"));
        assert!(line.contains("RAM 8.0/16.0 GB (50%)"));
        assert!(line.contains("down 2.0 KB/s"));
        assert!(!line.contains("ping"));
        assert!(line.contains("58 fps (game.exe)"));
        assert!(line.ends_with("| Limited"));
    }

    #[test]
    fn reply_summary() {
        let Some(Event::Reply(r)) = Event::parse(
            r#"{"success":false,"command":"shutdown","result":null,"error":"disabled","timestamp":1}"#,
        ) else {
            panic!("not a reply")
        };
        assert_eq!(reply_line(&r), "shutdown failed: disabled");
    }
}
