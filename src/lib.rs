//! Sable: chat/search API with a streaming relay, and the desktop overlay's
//! state model and sidecar bridge.

pub mod api;
pub mod config;
pub mod desktop;
pub mod error;
pub mod llm;
pub mod logger;
pub mod search;
pub mod sidecar;
pub mod store;
