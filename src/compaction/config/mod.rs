// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Compaction service configuration, parsed from a flat property view.
//!
//! Keys live under the `compactionService.` prefix and decompose as
//! `<service>.planner`, `<service>.planner.opts.<opt>`, or
//! `<service>.rate.limit`. See [`Config::from_store`].

pub mod readable;

use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Mutex,
};

use log::warn;
use snafu::ensure;

use self::readable::{ReadableDuration, ReadableSize};
use crate::{
    error::{self, Result},
    types::ServiceId,
};

pub const PROPERTY_PREFIX: &str = "compactionService.";
pub const LEGACY_MAX_CONCURRENT_PROPERTY: &str = "tserver.compaction.major.concurrent.max";
pub const LEGACY_THROUGHPUT_PROPERTY: &str = "tserver.compaction.major.throughput";
pub const MAX_TIME_BETWEEN_CHECKS_PROPERTY: &str = "compactionManager.max.time.between.checks";

const DEFAULT_PLANNER_CLASS: &str = "DefaultCompactionPlanner";
const DEFAULT_MAX_TIME_BETWEEN_CHECKS: &str = "5m";

/// The boundary interface onto the process configuration store. Implemented
/// by the host tablet server; this crate only ever reads through it.
pub trait ConfigStore: Send + Sync {
    /// All properties whose key starts with `prefix`, keyed by full property
    /// name (prefix included).
    fn get_all_properties_with_prefix(&self, prefix: &str) -> HashMap<String, String>;

    /// Whether `prop` has been explicitly set (as opposed to only having a
    /// compiled-in default).
    fn is_property_set(&self, prop: &str, include_defaults: bool) -> bool;

    /// Raw string value of a single property, if set.
    fn get_property(&self, prop: &str) -> Option<String>;
}

/// Accumulates deprecated-config warnings and logs each distinct message at
/// most once. Owned by whoever repeatedly rebuilds [`Config`] (normally the
/// manager), not process-global, so tests get an isolated instance.
#[derive(Default)]
pub struct DeprecationWarnings {
    seen: Mutex<HashSet<String>>,
}

impl DeprecationWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    fn warn_once(&self, message: impl Into<String>) {
        let message = message.into();
        let mut seen = self.seen.lock().unwrap();
        if seen.insert(message.clone()) {
            warn!("{}", message);
        }
    }
}

/// An immutable snapshot of compaction service configuration.
///
/// Equality and the derived notion of "did the config change" only consider
/// `planners`, `options`, and `rate_limits` — `default_rate_limit` is a
/// fallback value, not a structural part of the service topology, and is
/// deliberately excluded (mirrors the source system's behavior).
#[derive(Debug, Clone)]
pub struct Config {
    pub planners: HashMap<ServiceId, String>,
    pub options: HashMap<ServiceId, HashMap<String, String>>,
    pub rate_limits: HashMap<ServiceId, u64>,
    pub default_rate_limit: u64,
    pub max_time_between_checks: ReadableDuration,
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.planners == other.planners
            && self.options == other.options
            && self.rate_limits == other.rate_limits
    }
}

impl Eq for Config {}

impl Config {
    /// Build a snapshot from the config store, applying legacy property
    /// synthesis and validation. `warnings` dedupes repeated legacy-config
    /// messages across successive rebuilds of this same logical config.
    pub fn from_store(store: &dyn ConfigStore, warnings: &DeprecationWarnings) -> Result<Self> {
        let props = store.get_all_properties_with_prefix(PROPERTY_PREFIX);

        let mut planners: HashMap<ServiceId, String> = HashMap::new();
        let mut options: HashMap<ServiceId, HashMap<String, String>> = HashMap::new();
        let mut rate_limits: HashMap<ServiceId, u64> = HashMap::new();

        for (key, value) in &props {
            let rest = match key.strip_prefix(PROPERTY_PREFIX) {
                Some(rest) => rest,
                None => continue,
            };

            let mut parts = rest.splitn(2, '.');
            let service_name = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
                error::MalformedConfigSnafu {
                    key: key.clone(),
                    reason: "missing service name".to_string(),
                }
                .build()
            })?;
            let suffix = parts.next().ok_or_else(|| {
                error::MalformedConfigSnafu {
                    key: key.clone(),
                    reason: "missing '.planner' or '.rate.limit' suffix".to_string(),
                }
                .build()
            })?;
            let service = ServiceId::from(service_name);

            if suffix == "planner" {
                planners.insert(service, value.clone());
            } else if suffix == "rate.limit" {
                let limit = ReadableSize::from_str(value).map_err(|reason| {
                    error::MalformedConfigSnafu {
                        key: key.clone(),
                        reason,
                    }
                    .build()
                })?;
                rate_limits.insert(service, limit.as_bytes());
            } else if let Some(opt_name) = suffix.strip_prefix("planner.opts.") {
                if opt_name.is_empty() {
                    return error::MalformedConfigSnafu {
                        key: key.clone(),
                        reason: "empty planner option name".to_string(),
                    }
                    .fail();
                }
                options
                    .entry(service)
                    .or_default()
                    .insert(opt_name.to_string(), value.clone());
            } else {
                return error::MalformedConfigSnafu {
                    key: key.clone(),
                    reason: format!("unrecognized property shape '.{}'", suffix),
                }
                .fail();
            }
        }

        for service in options.keys() {
            ensure!(
                planners.contains_key(service),
                error::DanglingServiceOptionsSnafu {
                    service: service.to_string(),
                }
            );
        }

        let default_id = ServiceId::default_service();
        let has_explicit_default = planners.contains_key(&default_id);

        if let Some(raw) = store.get_property(LEGACY_MAX_CONCURRENT_PROPERTY) {
            let max_concurrent: u32 = raw.parse().map_err(|_| {
                error::MalformedConfigSnafu {
                    key: LEGACY_MAX_CONCURRENT_PROPERTY.to_string(),
                    reason: format!("'{}' is not a valid thread count", raw),
                }
                .build()
            })?;

            if !has_explicit_default {
                planners.insert(default_id.clone(), DEFAULT_PLANNER_CLASS.to_string());
                options.entry(default_id.clone()).or_default().insert(
                    "executors".to_string(),
                    format!("[{{name:'deprecated', numThreads:{}}}]", max_concurrent),
                );
                warnings.warn_once(format!(
                    "synthesized '{}' compaction service from deprecated property '{}'; \
                     configure '{}.planner' explicitly to silence this",
                    default_id, LEGACY_MAX_CONCURRENT_PROPERTY, default_id
                ));
            } else {
                warnings.warn_once(format!(
                    "ignoring deprecated property '{}' because '{}.planner' is set explicitly",
                    LEGACY_MAX_CONCURRENT_PROPERTY, default_id
                ));
            }
        }

        // The deprecated global throughput only ever feeds the *fallback*
        // default rate limit; it never mutates `rate_limits` itself, so an
        // explicit per-service limit (including one for `default`) is never
        // clobbered by it. See DESIGN.md for the open-question resolution.
        let default_rate_limit = match store.get_property(LEGACY_THROUGHPUT_PROPERTY) {
            Some(raw) => ReadableSize::from_str(&raw)
                .map_err(|reason| {
                    error::MalformedConfigSnafu {
                        key: LEGACY_THROUGHPUT_PROPERTY.to_string(),
                        reason,
                    }
                    .build()
                })?
                .as_bytes(),
            None => u64::MAX,
        };

        let max_time_between_checks = match store.get_property(MAX_TIME_BETWEEN_CHECKS_PROPERTY) {
            Some(raw) => ReadableDuration::from_str(&raw).map_err(|reason| {
                error::MalformedConfigSnafu {
                    key: MAX_TIME_BETWEEN_CHECKS_PROPERTY.to_string(),
                    reason,
                }
                .build()
            })?,
            None => ReadableDuration::from_str(DEFAULT_MAX_TIME_BETWEEN_CHECKS).unwrap(),
        };

        Ok(Config {
            planners,
            options,
            rate_limits,
            default_rate_limit,
            max_time_between_checks,
        })
    }

    pub fn rate_limit_for(&self, service: &ServiceId) -> u64 {
        self.rate_limits
            .get(service)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }

    pub fn options_for(&self, service: &ServiceId) -> HashMap<String, String> {
        self.options.get(service).cloned().unwrap_or_default()
    }
}
