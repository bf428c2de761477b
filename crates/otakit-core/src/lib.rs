//! otakit-core — wire formats, control messages, and configuration.
//! All other otakit crates depend on this one.

pub mod config;
pub mod fwdb;
pub mod message;
pub mod wire;

pub use message::{classify, ControlMessage, Inbound, MessageKind, ProtocolError};
