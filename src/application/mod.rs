//! Application Layer
//!
//! Business services coordinating domain objects and infrastructure.

pub mod services;

pub use services::*;
