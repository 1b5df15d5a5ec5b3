//! Upstream API layer: wire types, transport, retry and stream decoding.

pub mod client;
pub mod retry;
pub mod sse;
pub mod types;

pub use client::{AuthType, Client, Transport};
pub use sse::{StreamChunk, StreamReader};
