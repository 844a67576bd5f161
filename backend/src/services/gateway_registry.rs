//! In-memory gateway registry.
//!
//! The map itself is behind an `RwLock` that is only write-locked to add or
//! remove gateways. Each gateway sits behind its own `Mutex`, so the prober
//! can fold results for different gateways without contending on one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::catalog::builtin_catalog;
use crate::error::{AppError, Result};
use crate::models::gateway::validate_seed;
use crate::models::snapshot::ReputationEntry;
use crate::models::{Gateway, GatewaySeed};

type Entry = Arc<Mutex<Gateway>>;

#[derive(Default)]
pub struct GatewayRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in catalog.
    pub fn with_builtin_catalog() -> Self {
        let registry = Self::new();
        for seed in builtin_catalog() {
            if let Err(e) = registry.register(seed) {
                tracing::warn!(error = %e, "Skipping built-in gateway");
            }
        }
        registry
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.read_map().get(name).cloned()
    }

    /// Register a catalog gateway. An existing gateway with the same name keeps
    /// its reputation; only its static fields are refreshed. Returns `true`
    /// when the gateway is new.
    pub fn register(&self, seed: GatewaySeed) -> Result<bool> {
        validate_seed(&seed)?;
        let mut map = self.write_map();
        if let Some(existing) = map.get(&seed.name) {
            let mut gw = existing.lock().unwrap_or_else(PoisonError::into_inner);
            gw.url_template = seed.url_template;
            gw.region = seed.region;
            gw.priority = seed.priority;
            return Ok(false);
        }
        let name = seed.name.clone();
        map.insert(name, Arc::new(Mutex::new(Gateway::from_seed(seed, false))));
        Ok(true)
    }

    /// Register a user-supplied gateway. Names must be unique.
    pub fn register_custom(&self, seed: GatewaySeed) -> Result<Gateway> {
        validate_seed(&seed)?;
        let mut map = self.write_map();
        if map.contains_key(&seed.name) {
            return Err(AppError::Conflict(format!(
                "gateway '{}' already exists",
                seed.name
            )));
        }
        let gateway = Gateway::from_seed(seed, true);
        map.insert(gateway.name.clone(), Arc::new(Mutex::new(gateway.clone())));
        tracing::info!(name = %gateway.name, url = %gateway.url_template, "Custom gateway added");
        Ok(gateway)
    }

    /// Remove a custom gateway. Built-in gateways stay registered even while
    /// unavailable so they can recover.
    pub fn remove(&self, name: &str) -> Result<Gateway> {
        let mut map = self.write_map();
        let entry = map
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("gateway '{}'", name)))?;
        let gateway = entry.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if !gateway.custom {
            return Err(AppError::Validation(format!(
                "gateway '{}' is built-in and cannot be removed",
                name
            )));
        }
        map.remove(name);
        tracing::info!(name, "Custom gateway removed");
        Ok(gateway)
    }

    pub fn get(&self, name: &str) -> Option<Gateway> {
        self.entry(name)
            .map(|e| e.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Snapshot of every gateway, sorted by name.
    pub fn list(&self) -> Vec<Gateway> {
        let entries: Vec<Entry> = self.read_map().values().cloned().collect();
        let mut gateways: Vec<Gateway> = entries
            .iter()
            .map(|e| e.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        gateways.sort_by(|a, b| a.name.cmp(&b.name));
        gateways
    }

    /// Read-compute-write on a single gateway. Returns `None` if the gateway
    /// was removed in the meantime.
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut Gateway) -> R) -> Option<R> {
        let entry = self.entry(name)?;
        let mut gw = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut gw))
    }

    /// Replace the state of known gateways and add unknown ones from a
    /// persisted snapshot.
    pub fn restore(&self, gateways: Vec<Gateway>) -> usize {
        let mut map = self.write_map();
        let mut restored = 0;
        for mut gateway in gateways {
            if validate_seed(&gateway.seed()).is_err() {
                continue;
            }
            gateway.health_score = gateway.health_score.min(100);
            gateway.reliability_pct = gateway.reliability_pct.min(100);
            match map.get(&gateway.name) {
                Some(existing) => {
                    *existing.lock().unwrap_or_else(PoisonError::into_inner) = gateway;
                }
                None => {
                    map.insert(gateway.name.clone(), Arc::new(Mutex::new(gateway)));
                }
            }
            restored += 1;
        }
        restored
    }

    /// Seed the reputation of registered gateways from long-lived history.
    /// Availability is not restored; it is only established by a probe.
    pub fn apply_reputation(&self, entries: &[ReputationEntry]) -> usize {
        let mut applied = 0;
        for entry in entries {
            let updated = self.update(&entry.name, |gw| {
                gw.health_score = entry.health_score.min(100);
                gw.reliability_pct = entry.reliability_pct.min(100);
                gw.failure_count = entry.failure_count;
                gw.last_success_at = entry.last_success_at;
            });
            if updated.is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Most recent probe time across all gateways.
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.list().iter().filter_map(|g| g.last_checked_at).max()
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
