//! Gateway Keeper - Backend Library
//!
//! Keeps a pool of third-party content gateways measured, ranked and usable:
//! health probing, scoring, selection, download racing and automatic repair
//! of content that fails verification.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
