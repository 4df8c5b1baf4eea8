//! Types that mirror the agent's JSON schema. Only what the viewer shows;
//! unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Cpu {
    pub name: String,
    pub usage: f32,
    pub temperature: f32,
    pub clock: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Gpu {
    pub name: String,
    pub usage: f32,
    pub temperature: f32,
    pub vram_used: f64,
    pub vram_total: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Ram {
    pub used: f64,
    pub total: f64,
    pub used_percent: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Network {
    pub download: f64,
    pub upload: f64,
    pub ping: i64,
    pub local_ip: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Gaming {
    pub active: bool,
    pub fps: f32,
    pub process: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: i64,
    #[serde(default)]
    pub cpu: Cpu,
    #[serde(default)]
    pub gpu: Gpu,
    #[serde(default)]
    pub ram: Ram,
    pub network: Option<Network>,
    pub gaming: Option<Gaming>,
    #[serde(default)]
    pub admin_level: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Reply {
    pub success: bool,
    pub command: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: i64,
}

/// One inbound frame, classified.
#[derive(Debug, Clone)]
pub enum Event {
    Snapshot(Box<Snapshot>),
    Reply(Reply),
}

impl Event {
    /// Replies carry `success`; everything else with a timestamp is telemetry.
    pub fn parse(text: &str) -> Option<Event> {
        let v: Value = serde_json::from_str(text).ok()?;
        if v.get("success").is_some() {
            serde_json::from_value(v).ok().map(Event::Reply)
        } else {
            serde_json::from_value(v)
                .ok()
                .map(|s| Event::Snapshot(Box::new(s)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_frames() {
        let snap = r#"{"timestamp":5,"cpu":{"name":"x","usage":12.5,"temperature":40,"clock":3000,"cores":[]},
            "gpu":{"name":"g","vendor":"AMD","usage":1,"temperature":2,"vramUsed":1.5,"vramTotal":8},
            "ram":{"used":4,"total":16,"available":12,"usedPercent":25},"storage":[],
            "network":{"download":10,"upload":2,"ping":-1,"localIp":"10.0.0.2"},"adminLevel":"Full"}"#;
        match Event::parse(snap) {
            Some(Event::Snapshot(s)) => {
                assert_eq!(s.timestamp, 5);
                assert_eq!(s.ram.used_percent, 25.0);
                assert_eq!(s.network.unwrap().ping, -1);
                assert!(s.gaming.is_none());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let reply = r#"{"success":false,"command":"x","result":null,"error":"nope","timestamp":1}"#;
        match Event::parse(reply) {
            Some(Event::Reply(r)) => assert_eq!(r.error.as_deref(), Some("nope")),
            other => panic!("expected reply, got {other:?}"),
        }
        assert!(Event::parse("garbage").is_none());
    }
}
