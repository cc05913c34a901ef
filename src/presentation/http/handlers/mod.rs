//! HTTP Handlers

pub mod health;
pub mod movie;
pub mod room;
