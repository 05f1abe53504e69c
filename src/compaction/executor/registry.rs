// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Concurrent registry of external compaction executors, keyed by queue
//! name.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;

use super::external::ExternalCompactionExecutor;
use crate::types::ExternalExecutorId;

#[derive(Default)]
pub struct ExternalExecutorRegistry {
    executors: DashMap<ExternalExecutorId, Arc<ExternalCompactionExecutor>>,
}

impl ExternalExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the executor for `id`, creating it if this is the first
    /// reference.
    pub fn get_or_create(&self, id: &ExternalExecutorId) -> Arc<ExternalCompactionExecutor> {
        self.executors
            .entry(id.clone())
            .or_insert_with(|| Arc::new(ExternalCompactionExecutor::new()))
            .clone()
    }

    pub fn get(&self, id: &ExternalExecutorId) -> Option<Arc<ExternalCompactionExecutor>> {
        self.executors.get(id).map(|entry| entry.clone())
    }

    /// Retain only executors whose id is in `in_use`, dropping the rest.
    /// Called after a reconfiguration once the new set of live services is
    /// known.
    pub fn retain_used(&self, in_use: &HashSet<ExternalExecutorId>) {
        self.executors.retain(|id, _| in_use.contains(id));
    }

    pub fn ids(&self) -> Vec<ExternalExecutorId> {
        self.executors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
