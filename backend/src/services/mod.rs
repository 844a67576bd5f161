//! Gateway health, selection, racing and repair services.

pub mod catalog;
pub mod content_verifier;
pub mod download_race;
pub mod event_bus;
pub mod gateway_registry;
pub mod health_prober;
pub mod persistence;
pub mod repair_service;
pub mod scoring;
pub mod selector;
pub mod transport;
