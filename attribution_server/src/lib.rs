//! # Conversion Attribution Gateway server
//! This module hosts the HTTP surface of the gateway. It is responsible for:
//! * Accepting purchase submissions and running them through the attribution matching engine.
//! * Triggering conversion sync cycles, on demand and on a timer.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `POST /api/match`: Match one purchase, or a `{"purchases": [...]}` batch, against captured clicks.
//! * `POST /api/sync`: Run one conversion sync cycle and return its report.
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod integrations;
pub mod routes;
pub mod server;
pub mod sync_worker;

#[cfg(test)]
mod endpoint_tests;
