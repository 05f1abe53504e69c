// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! In-memory fakes for exercising scheduling logic without a real storage
//! engine, mirroring the host repository's own `SpaceStore`/table-data fakes
//! used by its compaction scheduler tests.

use std::sync::{Arc, Mutex, RwLock};

use crate::{
    compaction::{
        compactable::{Compactable, CompactableError, CompactableRef, CompactablesSource},
        planner::{CompactionJob, JobTarget, Planner, PlannerContext},
    },
    types::{CompactionKind, Extent, ExternalCompactionId, ServiceId},
};

/// A planner that hands out a deterministic, pre-configured job for a single
/// kind and declines everything else.
pub struct FakePlanner {
    pub kind: CompactionKind,
    pub target: JobTarget,
    pub priority: u32,
}

impl Planner for FakePlanner {
    fn plan(&self, ctx: &PlannerContext<'_>) -> Option<CompactionJob> {
        if ctx.kind != self.kind {
            return None;
        }
        Some(CompactionJob {
            kind: ctx.kind,
            extent: ctx.extent.clone(),
            priority: self.priority,
            target: self.target.clone(),
            estimated_input_bytes: 0,
        })
    }
}

#[derive(Default)]
struct FakeCompactableState {
    configured_service: Option<ServiceId>,
    external_ids: Vec<ExternalCompactionId>,
    committed: Vec<(ExternalCompactionId, u64, u64)>,
    failed: Vec<ExternalCompactionId>,
}

/// A tablet backed by shared interior-mutable state, so tests can assert on
/// what the manager called after the fact.
pub struct FakeCompactable {
    extent: Extent,
    state: Mutex<FakeCompactableState>,
}

impl FakeCompactable {
    pub fn new(extent: Extent) -> Arc<Self> {
        Arc::new(Self {
            extent,
            state: Mutex::new(FakeCompactableState::default()),
        })
    }

    pub fn with_configured_service(self: &Arc<Self>, service: ServiceId) -> &Arc<Self> {
        self.state.lock().unwrap().configured_service = Some(service);
        self
    }

    pub fn set_external_ids(&self, ids: Vec<ExternalCompactionId>) {
        self.state.lock().unwrap().external_ids = ids;
    }

    pub fn committed(&self) -> Vec<(ExternalCompactionId, u64, u64)> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn failed(&self) -> Vec<ExternalCompactionId> {
        self.state.lock().unwrap().failed.clone()
    }
}

impl Compactable for FakeCompactable {
    fn extent(&self) -> Extent {
        self.extent.clone()
    }

    fn configured_service(
        &self,
        _kind: CompactionKind,
    ) -> std::result::Result<Option<ServiceId>, CompactableError> {
        Ok(self.state.lock().unwrap().configured_service.clone())
    }

    fn external_compaction_ids(&self) -> std::result::Result<Vec<ExternalCompactionId>, CompactableError> {
        Ok(self.state.lock().unwrap().external_ids.clone())
    }

    fn commit_external_compaction(&self, ecid: ExternalCompactionId, file_size: u64, entries: u64) {
        self.state.lock().unwrap().committed.push((ecid, file_size, entries));
    }

    fn external_compaction_failed(&self, ecid: ExternalCompactionId) {
        self.state.lock().unwrap().failed.push(ecid);
    }
}

/// A fixed, mutable population of compactables, mirroring the weak iteration
/// consistency the real storage engine provides.
#[derive(Default)]
pub struct FakeCompactablesSource {
    tablets: RwLock<Vec<CompactableRef>>,
}

impl FakeCompactablesSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tablet: CompactableRef) {
        self.tablets.write().unwrap().push(tablet);
    }

    pub fn remove(&self, extent: &Extent) {
        self.tablets.write().unwrap().retain(|t| &t.extent() != extent);
    }
}

impl CompactablesSource for FakeCompactablesSource {
    fn current(&self) -> Vec<CompactableRef> {
        self.tablets.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExternalExecutorId;

    #[test]
    fn test_fake_planner_matches_kind_only() {
        let planner = FakePlanner {
            kind: CompactionKind::User,
            target: JobTarget::External(ExternalExecutorId::from("q1")),
            priority: 5,
        };
        let extent = Extent {
            table_id: 1,
            start_key: vec![],
            end_key: vec![],
        };
        let opts = Default::default();
        let ctx = PlannerContext {
            kind: CompactionKind::User,
            extent: &extent,
            options: &opts,
            rate_limit: u64::MAX,
        };
        assert!(planner.plan(&ctx).is_some());

        let ctx_other = PlannerContext {
            kind: CompactionKind::System,
            ..ctx
        };
        assert!(planner.plan(&ctx_other).is_none());
    }

    #[test]
    fn test_fake_compactable_records_commit_and_failure() {
        let tablet = FakeCompactable::new(Extent {
            table_id: 1,
            start_key: vec![],
            end_key: vec![],
        });
        let ecid = ExternalCompactionId::generate();
        tablet.commit_external_compaction(ecid, 1024, 7);
        assert_eq!(tablet.committed(), vec![(ecid, 1024, 7)]);

        let ecid2 = ExternalCompactionId::generate();
        tablet.external_compaction_failed(ecid2);
        assert_eq!(tablet.failed(), vec![ecid2]);
    }

    #[test]
    fn test_fake_compactables_source_add_remove() {
        let source = FakeCompactablesSource::new();
        let extent = Extent {
            table_id: 1,
            start_key: vec![],
            end_key: vec![],
        };
        let tablet = FakeCompactable::new(extent.clone());
        source.add(tablet);
        assert_eq!(source.current().len(), 1);

        source.remove(&extent);
        assert!(source.current().is_empty());
    }
}
