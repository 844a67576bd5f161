//! HTTP request handlers.

pub mod content;
pub mod gateways;
pub mod health;
pub mod repairs;
