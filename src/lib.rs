//! Offline-first progress sync engine for Playvex games, exposing modules for binaries and
//! integration tests.

/// Identity provider seam and the in-process provider.
pub mod auth;
/// Environment-driven configuration.
pub mod config;
/// Local stores and remote mirrors.
pub mod dao;
/// Request and response payloads for the HTTP API.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// Axum routers.
pub mod routes;
/// Sync, account and settings logic.
pub mod services;
/// Shared application state.
pub mod state;
