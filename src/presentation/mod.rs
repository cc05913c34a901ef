//! Presentation Layer
//!
//! HTTP routes and the real-time WebSocket layer.

pub mod http;
pub mod middleware;
pub mod websocket;
