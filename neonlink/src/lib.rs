//! Client side of the NeonLink wire protocol.

pub mod session;
pub mod summary;
pub mod types;
pub mod ws;
