//! mesh-core — shared types, wire format, and cryptographic primitives for
//! a low-bandwidth, intermittently-connected peer-to-peer mesh.
//!
//! Every other crate in the workspace depends on this one.

pub mod config;
pub mod message;
pub mod primitives;
pub mod wire;

pub use config::{ConfigError, MeshConfig};
pub use message::Message;
pub use wire::{HeaderFields, MessageType, ParsedFrame, ParsedHeader, WireError};
