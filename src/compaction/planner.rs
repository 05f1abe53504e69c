// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! The pluggable planner seam. This crate hosts planners; it does not
//! implement compaction selection policy itself.

use std::collections::HashMap;

use crate::types::{CompactionKind, Extent, ExternalExecutorId};

/// Where a planned job should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    Internal(String),
    External(ExternalExecutorId),
}

/// A unit of work a planner hands back to the owning [`CompactionService`]
/// for a single `plan` call.
///
/// [`CompactionService`]: crate::compaction::service::CompactionService
#[derive(Debug, Clone)]
pub struct CompactionJob {
    pub kind: CompactionKind,
    pub extent: Extent,
    pub priority: u32,
    pub target: JobTarget,
    pub estimated_input_bytes: u64,
}

/// Everything a planner needs to decide whether (and how) to compact one
/// tablet for one kind.
pub struct PlannerContext<'a> {
    pub kind: CompactionKind,
    pub extent: &'a Extent,
    pub options: &'a HashMap<String, String>,
    pub rate_limit: u64,
}

/// The pluggable compaction policy. Implementations decide which files (not
/// modeled here) to merge and where the resulting job should run; this crate
/// only needs the decision, not the mechanics of producing it.
pub trait Planner: Send + Sync {
    /// Produce a job for `ctx`, or `None` if nothing needs compacting right
    /// now. Must not block.
    fn plan(&self, ctx: &PlannerContext<'_>) -> Option<CompactionJob>;
}

/// A placeholder planner used when no real policy has been wired in (e.g.
/// the synthesized `default` service created from a deprecated property).
/// Always declines to compact — a host that actually wants work done must
/// register a real [`Planner`] under that class name.
#[derive(Debug, Default)]
pub struct DefaultCompactionPlanner;

impl Planner for DefaultCompactionPlanner {
    fn plan(&self, _ctx: &PlannerContext<'_>) -> Option<CompactionJob> {
        None
    }
}

type PlannerCtor = Box<dyn Fn(&HashMap<String, String>) -> Box<dyn Planner> + Send + Sync>;

/// Maps a configured `planner` class name to a constructor. Hosts register
/// their real planner implementations here before starting the manager;
/// `"DefaultCompactionPlanner"` is pre-registered as a harmless no-op.
pub struct PlannerRegistry {
    ctors: HashMap<String, PlannerCtor>,
}

impl Default for PlannerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };
        registry.register("DefaultCompactionPlanner", |_opts| {
            Box::new(DefaultCompactionPlanner) as Box<dyn Planner>
        });
        registry
    }
}

impl PlannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_name: impl Into<String>, ctor: F)
    where
        F: Fn(&HashMap<String, String>) -> Box<dyn Planner> + Send + Sync + 'static,
    {
        self.ctors.insert(class_name.into(), Box::new(ctor));
    }

    /// Build a planner instance for `class_name`. Returns `None` if the
    /// class name is unknown; the caller treats that as a service
    /// construction failure.
    pub fn build(
        &self,
        class_name: &str,
        options: &HashMap<String, String>,
    ) -> Option<Box<dyn Planner>> {
        self.ctors.get(class_name).map(|ctor| ctor(options))
    }
}
