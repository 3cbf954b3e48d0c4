//! HTTP route handlers.

pub mod admin;
pub mod health;
pub mod metrics;
pub mod payments;
pub mod reservations;
pub mod stock;
