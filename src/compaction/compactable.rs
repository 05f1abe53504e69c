// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Boundary traits onto the tablet server's view of its own tablets.

use std::sync::Arc;

use crate::types::{CompactionKind, Extent, ExternalCompactionId, ServiceId};

/// Error surfaced by a [`Compactable`] call, e.g. an I/O failure while the
/// storage engine inspects a tablet's state. Propagated by the manager's
/// main loop as a per-iteration failure that engages the retry policy.
pub type CompactableError = Box<dyn std::error::Error + Send + Sync>;

/// A tablet's view of itself as a participant in compaction scheduling.
/// Implemented by the storage engine; the manager only ever calls through
/// this trait.
pub trait Compactable: Send + Sync {
    fn extent(&self) -> Extent;

    /// Which compaction service this tablet is currently configured to use
    /// for `kind`, if any.
    fn configured_service(
        &self,
        kind: CompactionKind,
    ) -> std::result::Result<Option<ServiceId>, CompactableError>;

    /// External compaction ids this tablet currently knows about (i.e. still
    /// considers itself a participant in). Used by the manager to reconcile
    /// `runningExternalCompactions` during a sweep.
    fn external_compaction_ids(&self) -> std::result::Result<Vec<ExternalCompactionId>, CompactableError>;

    fn commit_external_compaction(&self, ecid: ExternalCompactionId, file_size: u64, entries: u64);

    fn external_compaction_failed(&self, ecid: ExternalCompactionId);
}

pub type CompactableRef = Arc<dyn Compactable>;

/// A repeatedly-iterable collection of the tablets currently hosted by this
/// server. Iteration is weakly consistent: a sweep may miss a tablet that
/// enrolls mid-sweep, or observe one that closes mid-sweep; both are
/// reconciled on the next pass.
pub trait CompactablesSource: Send + Sync {
    /// Snapshot of currently-known compactables. Taken once per sweep; the
    /// manager never assumes the source itself is internally consistent
    /// across two calls.
    fn current(&self) -> Vec<CompactableRef>;
}

/// Invoked by a [`CompactionService`](crate::compaction::service::CompactionService)
/// when a submitted job finishes, so the manager can re-evaluate the tablet
/// promptly instead of waiting for the next sweep.
pub type CompletionNotifier = Arc<dyn Fn(CompactableRef) + Send + Sync>;
