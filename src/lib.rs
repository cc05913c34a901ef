//! # ReelChat Library
//!
//! This crate provides a movie-social chat backend with:
//! - Real-time one-to-one and room messaging over WebSocket
//! - An in-memory presence hub routing live traffic
//! - A resilient AMQP broker client for offline delivery and notifications
//! - PostgreSQL for persistent storage
//! - Redis for profile caching
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core business entities and repository traits
//! - **Application Layer**: Business logic services
//! - **Infrastructure Layer**: Database, cache, broker, and push implementations
//! - **Presentation Layer**: HTTP handlers and the WebSocket layer
//!
//! ## Module Structure
//!
//! ```text
//! reelchat/
//! +-- config/        Configuration management
//! +-- domain/        Domain entities and repository traits
//! +-- application/   Application services
//! +-- infrastructure/ Database, cache, broker, notification, and push
//! +-- presentation/  HTTP routes and the WebSocket hub/session/router
//! +-- shared/        Common utilities (errors, reporting, supervision)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business objects
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
