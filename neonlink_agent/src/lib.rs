//! NeonLink agent: samples host hardware sensors and streams snapshots to
//! viewers on the local network over WebSocket.

pub mod agent;
pub mod broadcast;
pub mod channel;
pub mod commands;
pub mod config;
pub mod control;
pub mod discovery;
pub mod gaming;
pub mod gpu;
pub mod proto;
pub mod registry;
pub mod sampler;
pub mod security;
pub mod sensors;
pub mod server;
pub mod state;
pub mod tls;
pub mod types;

pub use agent::{Agent, RunningAgent};
pub use config::AgentConfig;
