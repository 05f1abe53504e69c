// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! The scheduling nucleus: main loop, hot reconfiguration, external
//! compaction lifecycle, and metrics aggregation.

use std::{
    collections::{HashMap, HashSet},
    sync::{atomic::{AtomicU64, Ordering}, Arc, Mutex},
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use log::{error, info, warn};
use snafu::{ensure, ResultExt};
use tokio::sync::mpsc;

use super::{
    compactable::{CompactableRef, CompactablesSource, CompletionNotifier},
    config::{Config, ConfigStore, DeprecationWarnings},
    executor::{registry::ExternalExecutorRegistry, ReservedJob},
    metrics::{ExternalExecutorMetrics, MetricsSink},
    planner::PlannerRegistry,
    service::{CompactionRunner, CompactionService},
};
use crate::{
    error::{self, Result},
    types::{CompactionKind, CompactorId, Extent, ExternalCompactionId, ExternalExecutorId, ServiceId},
};

const MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(1);
const QUEUE_CAPACITY: usize = 4096;

/// Owns every [`CompactionService`], the external executor registry, the
/// running-external table, and the main scheduling loop. Conceptually a
/// per-process singleton; expressed as a plain value behind `Arc` rather than
/// process-global state, per the host's "pass a handle" convention.
pub struct CompactionManager {
    config_store: Arc<dyn ConfigStore>,
    planner_registry: PlannerRegistry,
    runner: Arc<dyn CompactionRunner>,
    compactables_source: Arc<dyn CompactablesSource>,

    services: ArcSwap<HashMap<ServiceId, Arc<CompactionService>>>,
    external_executors: Arc<ExternalExecutorRegistry>,
    running_external: DashMap<ExternalCompactionId, (Extent, ExternalExecutorId, Option<CompactorId>)>,

    deprecation_warnings: DeprecationWarnings,
    current_config: Mutex<Config>,
    reload_lock: tokio::sync::Mutex<()>,
    last_reload: Mutex<Instant>,
    /// Millis, so it can be live-updated by `check_for_config_changes`
    /// independent of the topology-equality short-circuit on `Config`.
    max_time_between_checks_millis: AtomicU64,

    queue_tx: mpsc::Sender<CompactableRef>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<CompactableRef>>,
}

impl CompactionManager {
    /// Build the initial config and one service per configured name;
    /// construction failures are logged and that service is omitted.
    /// Does not start the main loop — call [`Self::start`].
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        planner_registry: PlannerRegistry,
        runner: Arc<dyn CompactionRunner>,
        compactables_source: Arc<dyn CompactablesSource>,
    ) -> Result<Arc<Self>> {
        let deprecation_warnings = DeprecationWarnings::new();
        let config = Config::from_store(config_store.as_ref(), &deprecation_warnings)?;
        let external_executors = Arc::new(ExternalExecutorRegistry::new());

        let mut services = HashMap::new();
        for (service_id, planner_class) in &config.planners {
            let rate_limit = config.rate_limit_for(service_id);
            let options = config.options_for(service_id);
            match CompactionService::new(
                service_id.clone(),
                planner_class,
                &planner_registry,
                rate_limit,
                options,
                runner.clone(),
                external_executors.clone(),
            ) {
                Ok(service) => {
                    services.insert(service_id.clone(), Arc::new(service));
                }
                Err(e) => error!(
                    "failed to construct compaction service '{}', skipping it: {}",
                    service_id, e
                ),
            }
        }
        info!("compaction manager starting with {} service(s)", services.len());

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let max_time_between_checks_millis = AtomicU64::new(config.max_time_between_checks.as_millis_u64());

        Ok(Arc::new(Self {
            config_store,
            planner_registry,
            runner,
            compactables_source,
            services: ArcSwap::from_pointee(services),
            external_executors,
            running_external: DashMap::new(),
            deprecation_warnings,
            current_config: Mutex::new(config),
            reload_lock: tokio::sync::Mutex::new(()),
            last_reload: Mutex::new(Instant::now()),
            max_time_between_checks_millis,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
        }))
    }

    /// Launch the main scheduling loop on a dedicated task.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        info!("starting compaction manager main loop");
        tokio::spawn(async move { manager.main_loop().await })
    }

    fn max_time_between_checks(&self) -> Duration {
        Duration::from_millis(self.max_time_between_checks_millis.load(Ordering::Relaxed))
    }

    fn completion_notifier(self: &Arc<Self>) -> CompletionNotifier {
        let tx = self.queue_tx.clone();
        Arc::new(move |c: CompactableRef| {
            // Best-effort: a full or closed queue just means the next sweep
            // picks this tablet up instead (duplicates are tolerated).
            let _ = tx.try_send(c);
        })
    }

    async fn main_loop(self: Arc<Self>) {
        let initial = self.max_time_between_checks();
        let increment = std::cmp::max(initial / 10, Duration::from_millis(1));
        let mut retry = super::retry::RetryPolicy::new(increment, initial);
        let mut last_check_all = Instant::now();

        loop {
            match self.run_iteration(&mut last_check_all).await {
                Ok(()) => {
                    if retry.has_backed_off() {
                        retry.reset();
                    }
                }
                Err(e) => {
                    retry.back_off(&e.to_string()).await;
                }
            }
        }
    }

    /// One pass of the scheduling loop: either a full sweep or a single
    /// triggered compactable, followed by a config-change check. Any error
    /// aborts the pass; the caller engages backoff and tries again from the
    /// top.
    async fn run_iteration(self: &Arc<Self>, last_check_all: &mut Instant) -> Result<()> {
        let max_time_between_checks = self.max_time_between_checks();
        let elapsed = last_check_all.elapsed();
        if elapsed >= max_time_between_checks {
            self.sweep().await?;
            *last_check_all = Instant::now();
        } else {
            let remaining = max_time_between_checks - elapsed;
            let mut rx = self.queue_rx.lock().await;
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(compactable)) => {
                    drop(rx);
                    self.submit_compaction(&compactable).await?;
                }
                Ok(None) => return error::ChannelClosedSnafu.fail(),
                Err(_timed_out) => {}
            }
        }
        self.check_for_config_changes(false).await
    }

    /// Reconcile `running_external` against what every compactable still
    /// reports, submitting a compaction for each along the way.
    async fn sweep(self: &Arc<Self>) -> Result<()> {
        let mut pending: HashSet<ExternalCompactionId> =
            self.running_external.iter().map(|e| *e.key()).collect();

        for compactable in self.compactables_source.current() {
            self.submit_compaction(&compactable).await?;
            let known = compactable
                .external_compaction_ids()
                .context(error::CompactableFailedSnafu)?;
            for ecid in known {
                pending.remove(&ecid);
            }
        }

        for ecid in pending {
            if self.running_external.remove(&ecid).is_some() {
                warn!(
                    "reconciliation: dropped orphaned external compaction {}, no tablet claims it",
                    ecid
                );
            }
        }
        Ok(())
    }

    /// Route one compactable through every compaction kind, looking up (and,
    /// if necessary, forcing a reload to discover) its configured service.
    async fn submit_compaction(self: &Arc<Self>, compactable: &CompactableRef) -> Result<()> {
        for kind in CompactionKind::ALL {
            let service_id = match compactable
                .configured_service(kind)
                .context(error::CompactableFailedSnafu)?
            {
                Some(id) => id,
                None => continue,
            };

            let mut service = self.services.load().get(&service_id).cloned();
            if service.is_none() {
                self.check_for_config_changes(true).await?;
                service = self.services.load().get(&service_id).cloned();
            }

            let service = match service {
                Some(service) => service,
                None => {
                    error!(
                        "compaction service '{}' not found for kind {}, falling back to '{}'",
                        service_id,
                        kind,
                        ServiceId::default_service()
                    );
                    match self
                        .services
                        .load()
                        .get(&ServiceId::default_service())
                        .cloned()
                    {
                        Some(default_service) => default_service,
                        None => continue,
                    }
                }
            };

            service.submit(kind, compactable.clone(), self.completion_notifier());
        }
        Ok(())
    }

    /// Rebuild `services` from a fresh `Config` if it changed.
    /// Guarded so only one reload runs at a time; skipped (except when
    /// `force`d) unless at least a second has elapsed since the last one.
    async fn check_for_config_changes(self: &Arc<Self>, force: bool) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        if !force && self.last_reload.lock().unwrap().elapsed() < MIN_RELOAD_INTERVAL {
            return Ok(());
        }

        let new_config = match Config::from_store(self.config_store.as_ref(), &self.deprecation_warnings) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to reload compaction manager config, retaining previous: {}", e);
                *self.last_reload.lock().unwrap() = Instant::now();
                return Ok(());
            }
        };

        // Excluded from `Config::eq`'s topology comparison below, so it must
        // be applied unconditionally or a reload that changes only this
        // property would never take effect.
        self.max_time_between_checks_millis
            .store(new_config.max_time_between_checks.as_millis_u64(), Ordering::Relaxed);

        if *self.current_config.lock().unwrap() == new_config {
            *self.last_reload.lock().unwrap() = Instant::now();
            return Ok(());
        }

        let old_services = self.services.load_full();
        let mut fresh = HashMap::new();
        for (service_id, planner_class) in &new_config.planners {
            let rate_limit = new_config.rate_limit_for(service_id);
            let options = new_config.options_for(service_id);

            if let Some(existing) = old_services.get(service_id) {
                match existing.configuration_changed(
                    &self.planner_registry,
                    planner_class,
                    rate_limit,
                    options,
                ) {
                    Ok(()) => {
                        fresh.insert(service_id.clone(), existing.clone());
                    }
                    Err(e) => error!("failed to reconfigure service '{}': {}", service_id, e),
                }
            } else {
                match CompactionService::new(
                    service_id.clone(),
                    planner_class,
                    &self.planner_registry,
                    rate_limit,
                    options,
                    self.runner.clone(),
                    self.external_executors.clone(),
                ) {
                    Ok(service) => {
                        fresh.insert(service_id.clone(), Arc::new(service));
                    }
                    Err(e) => error!("failed to construct service '{}': {}", service_id, e),
                }
            }
        }

        for (service_id, service) in old_services.iter() {
            if !fresh.contains_key(service_id) {
                service.stop();
                info!("stopped compaction service '{}', no longer configured", service_id);
            }
        }

        let in_use: HashSet<ExternalExecutorId> = fresh
            .values()
            .flat_map(|service| service.external_executors_in_use())
            .collect();
        self.external_executors.retain_used(&in_use);

        self.services.store(Arc::new(fresh));
        *self.current_config.lock().unwrap() = new_config;
        *self.last_reload.lock().unwrap() = Instant::now();
        info!("compaction manager configuration reloaded");
        Ok(())
    }

    /// Reserve a job from `queue` at or above `priority` on behalf of
    /// `compactor_id`, recording it under `ecid` on success.
    pub fn reserve_external_compaction(
        &self,
        queue: &ExternalExecutorId,
        priority: u32,
        compactor_id: &CompactorId,
        ecid: ExternalCompactionId,
    ) -> Option<ReservedJob> {
        let executor = self.external_executors.get_or_create(queue);
        let reserved = executor.reserve(priority)?;
        self.running_external.insert(
            ecid,
            (reserved.extent.clone(), queue.clone(), Some(compactor_id.clone())),
        );
        info!(
            "reserved external compaction {}, queue:'{}', extent:{}, compactor:'{}'",
            ecid, queue, reserved.extent, compactor_id
        );
        Some(reserved)
    }

    /// Record an external compaction the tablet server learned of through
    /// another path. The claiming compactor's identity is not known here.
    pub fn register_external_compaction(
        &self,
        ecid: ExternalCompactionId,
        extent: Extent,
        executor_id: ExternalExecutorId,
    ) {
        self.running_external.insert(ecid, (extent, executor_id, None));
    }

    pub fn commit_external_compaction(
        self: &Arc<Self>,
        ecid: ExternalCompactionId,
        extent: Extent,
        current_tablets: &HashMap<Extent, CompactableRef>,
        file_size: u64,
        entries: u64,
    ) -> Result<()> {
        let stored = match self.running_external.remove(&ecid) {
            Some((_, (stored_extent, _, _))) => stored_extent,
            None => return Ok(()),
        };
        ensure!(
            stored == extent,
            error::ExtentMismatchSnafu {
                ecid,
                stored,
                given: extent,
            }
        );
        if let Some(tablet) = current_tablets.get(&extent) {
            tablet.commit_external_compaction(ecid, file_size, entries);
            let _ = self.queue_tx.try_send(tablet.clone());
        }
        Ok(())
    }

    pub fn external_compaction_failed(
        self: &Arc<Self>,
        ecid: ExternalCompactionId,
        extent: Extent,
        current_tablets: &HashMap<Extent, CompactableRef>,
    ) -> Result<()> {
        let stored = match self.running_external.remove(&ecid) {
            Some((_, (stored_extent, _, _))) => stored_extent,
            None => return Ok(()),
        };
        ensure!(
            stored == extent,
            error::ExtentMismatchSnafu {
                ecid,
                stored,
                given: extent,
            }
        );
        if let Some(tablet) = current_tablets.get(&extent) {
            tablet.external_compaction_failed(ecid);
            let _ = self.queue_tx.try_send(tablet.clone());
        }
        Ok(())
    }

    /// A tablet vanished. Drop any running-external entries it was part of
    /// and let each service it used forget any pending state.
    pub fn compactable_closed(
        &self,
        extent: &Extent,
        services_used: &[ServiceId],
        ecids: &[ExternalCompactionId],
    ) {
        for ecid in ecids {
            self.running_external.remove(ecid);
        }
        let services = self.services.load();
        for service_id in services_used {
            if let Some(service) = services.get(service_id) {
                service.compactable_closed(extent);
            }
        }
    }
}

impl MetricsSink for CompactionManager {
    fn compactions_running(&self) -> u64 {
        let internal: u64 = self
            .services
            .load()
            .values()
            .map(|s| s.total_compactions_running())
            .sum();
        internal + self.running_external.len() as u64
    }

    fn compactions_queued(&self) -> u64 {
        let internal: u64 = self
            .services
            .load()
            .values()
            .map(|s| s.total_compactions_queued())
            .sum();
        let external: u64 = self
            .external_executors
            .ids()
            .iter()
            .filter_map(|id| self.external_executors.get(id))
            .map(|executor| executor.queued() as u64)
            .sum();
        internal + external
    }

    fn external_metrics(&self) -> Vec<ExternalExecutorMetrics> {
        let mut ids: HashSet<ExternalExecutorId> = self.external_executors.ids().into_iter().collect();
        for entry in self.running_external.iter() {
            ids.insert(entry.value().1.clone());
        }

        ids.into_iter()
            .map(|id| {
                let queued = self
                    .external_executors
                    .get(&id)
                    .map(|executor| executor.queued() as u64)
                    .unwrap_or(0);
                let running = self
                    .running_external
                    .iter()
                    .filter(|entry| entry.value().1 == id)
                    .count() as u64;
                ExternalExecutorMetrics { id, queued, running }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compaction::{
            compactable::{Compactable, CompactableError},
            config::MAX_TIME_BETWEEN_CHECKS_PROPERTY,
            planner::{CompactionJob, JobTarget, Planner, PlannerContext},
            service::NoopCompactionRunner,
        },
    };

    #[derive(Default)]
    struct MapConfigStore {
        props: Mutex<HashMap<String, String>>,
    }

    impl MapConfigStore {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                props: Mutex::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            }
        }

        fn clear(&self) {
            self.props.lock().unwrap().clear();
        }
    }

    impl ConfigStore for MapConfigStore {
        fn get_all_properties_with_prefix(&self, prefix: &str) -> HashMap<String, String> {
            self.props
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
        fn is_property_set(&self, prop: &str, _include_defaults: bool) -> bool {
            self.props.lock().unwrap().contains_key(prop)
        }
        fn get_property(&self, prop: &str) -> Option<String> {
            self.props.lock().unwrap().get(prop).cloned()
        }
    }

    struct AlwaysPlansInternal;
    impl Planner for AlwaysPlansInternal {
        fn plan(&self, ctx: &PlannerContext<'_>) -> Option<CompactionJob> {
            Some(CompactionJob {
                kind: ctx.kind,
                extent: ctx.extent.clone(),
                priority: 1,
                target: JobTarget::Internal("e1".to_string()),
                estimated_input_bytes: 0,
            })
        }
    }

    struct FakeTablet {
        extent: Extent,
        service: Option<ServiceId>,
    }

    impl Compactable for FakeTablet {
        fn extent(&self) -> Extent {
            self.extent.clone()
        }
        fn configured_service(
            &self,
            kind: CompactionKind,
        ) -> std::result::Result<Option<ServiceId>, CompactableError> {
            if kind == CompactionKind::User {
                Ok(self.service.clone())
            } else {
                Ok(None)
            }
        }
        fn external_compaction_ids(&self) -> std::result::Result<Vec<ExternalCompactionId>, CompactableError> {
            Ok(vec![])
        }
        fn commit_external_compaction(&self, _ecid: ExternalCompactionId, _file_size: u64, _entries: u64) {}
        fn external_compaction_failed(&self, _ecid: ExternalCompactionId) {}
    }

    fn extent(id: u64) -> Extent {
        Extent {
            table_id: id,
            start_key: vec![],
            end_key: vec![],
        }
    }

    struct EmptySource;
    impl CompactablesSource for EmptySource {
        fn current(&self) -> Vec<CompactableRef> {
            vec![]
        }
    }

    fn manager_with_default_service() -> Arc<CompactionManager> {
        manager_with_store(MapConfigStore::new(&[
            ("compactionService.default.planner", "P"),
            (
                "compactionService.default.planner.opts.executors",
                "[{name:'e1',numThreads:2}]",
            ),
        ]))
        .0
    }

    fn manager_with_store(store: MapConfigStore) -> (Arc<CompactionManager>, Arc<MapConfigStore>) {
        let _ = env_logger::try_init();
        let store = Arc::new(store);
        let mut registry = PlannerRegistry::new();
        registry.register("P", |_opts| Box::new(AlwaysPlansInternal) as Box<dyn Planner>);

        let manager = CompactionManager::new(
            store.clone(),
            registry,
            Arc::new(NoopCompactionRunner),
            Arc::new(EmptySource),
        )
        .unwrap();
        (manager, store)
    }

    fn manager_with_source(source: Arc<crate::testing::FakeCompactablesSource>) -> Arc<CompactionManager> {
        let _ = env_logger::try_init();
        let store = Arc::new(MapConfigStore::new(&[("compactionService.default.planner", "P")]));
        let mut registry = PlannerRegistry::new();
        registry.register("P", |_opts| Box::new(AlwaysPlansInternal) as Box<dyn Planner>);

        CompactionManager::new(store, registry, Arc::new(NoopCompactionRunner), source).unwrap()
    }

    #[tokio::test]
    async fn test_submit_compaction_routes_to_configured_service() {
        let manager = manager_with_default_service();
        let tablet: CompactableRef = Arc::new(FakeTablet {
            extent: extent(1),
            service: Some(ServiceId::default_service()),
        });

        manager.submit_compaction(&tablet).await.unwrap();
        assert_eq!(manager.compactions_queued() + manager.compactions_running(), 1);
    }

    #[tokio::test]
    async fn test_submit_compaction_skips_when_unconfigured() {
        let manager = manager_with_default_service();
        let tablet: CompactableRef = Arc::new(FakeTablet {
            extent: extent(1),
            service: None,
        });

        manager.submit_compaction(&tablet).await.unwrap();
        assert_eq!(manager.compactions_queued() + manager.compactions_running(), 0);
    }

    #[tokio::test]
    async fn test_submit_compaction_falls_back_to_default_on_unknown_service() {
        let manager = manager_with_default_service();
        let tablet: CompactableRef = Arc::new(FakeTablet {
            extent: extent(1),
            service: Some(ServiceId::from("does-not-exist")),
        });

        manager.submit_compaction(&tablet).await.unwrap();
        assert_eq!(manager.compactions_queued() + manager.compactions_running(), 1);
    }

    #[tokio::test]
    async fn test_reserve_commit_and_extent_mismatch() {
        let manager = manager_with_default_service();
        let queue = ExternalExecutorId::from("q1");
        let tablet: Arc<dyn Compactable> = Arc::new(FakeTablet {
            extent: extent(7),
            service: None,
        });

        let executor = manager.external_executors.get_or_create(&queue);
        executor.submit(
            10,
            Arc::downgrade(&tablet),
            CompactionJob {
                kind: CompactionKind::User,
                extent: extent(7),
                priority: 10,
                target: JobTarget::External(queue.clone()),
                estimated_input_bytes: 0,
            },
        );

        let ecid = ExternalCompactionId::generate();
        let compactor_id = CompactorId::from("compactor-1");
        let reserved = manager
            .reserve_external_compaction(&queue, 0, &compactor_id, ecid)
            .unwrap();
        assert_eq!(reserved.extent, extent(7));

        let mut current = HashMap::new();
        current.insert(extent(7), tablet.clone());

        let err = manager
            .commit_external_compaction(ecid, extent(8), &current, 0, 0)
            .unwrap_err();
        assert!(matches!(err, error::Error::ExtentMismatch { .. }));

        manager
            .commit_external_compaction(ecid, extent(7), &current, 1024, 10)
            .unwrap();
        assert!(manager.running_external.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_external_compaction_records_compactor_id() {
        let manager = manager_with_default_service();
        let queue = ExternalExecutorId::from("q1");
        let tablet: Arc<dyn Compactable> = Arc::new(FakeTablet {
            extent: extent(9),
            service: None,
        });

        let executor = manager.external_executors.get_or_create(&queue);
        executor.submit(
            10,
            Arc::downgrade(&tablet),
            CompactionJob {
                kind: CompactionKind::User,
                extent: extent(9),
                priority: 10,
                target: JobTarget::External(queue.clone()),
                estimated_input_bytes: 0,
            },
        );

        let ecid = ExternalCompactionId::generate();
        let compactor_id = CompactorId::from("compactor-7");
        manager
            .reserve_external_compaction(&queue, 0, &compactor_id, ecid)
            .unwrap();

        let recorded = manager.running_external.get(&ecid).unwrap();
        assert_eq!(recorded.2, Some(compactor_id));
    }

    #[tokio::test]
    async fn test_config_reload_stops_removed_service() {
        let (manager, store) = manager_with_store(MapConfigStore::new(&[
            ("compactionService.default.planner", "P"),
        ]));
        assert!(manager.services.load().contains_key(&ServiceId::default_service()));

        store.clear();
        manager.check_for_config_changes(true).await.unwrap();
        assert!(!manager.services.load().contains_key(&ServiceId::default_service()));
    }

    #[tokio::test]
    async fn test_config_reload_updates_max_time_between_checks_even_when_topology_unchanged() {
        let (manager, store) = manager_with_store(MapConfigStore::new(&[
            ("compactionService.default.planner", "P"),
        ]));
        let initial = manager.max_time_between_checks();

        store
            .props
            .lock()
            .unwrap()
            .insert(MAX_TIME_BETWEEN_CHECKS_PROPERTY.to_string(), "10ms".to_string());

        // Topology (service/planner set) is unchanged, so `Config::eq` sees
        // no difference; the live timing value must still update.
        manager.check_for_config_changes(true).await.unwrap();

        let updated = manager.max_time_between_checks();
        assert_ne!(updated, initial);
        assert_eq!(updated, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_sweep_drops_orphaned_external_compaction() {
        let source = Arc::new(crate::testing::FakeCompactablesSource::new());
        let manager = manager_with_source(source);
        let queue = ExternalExecutorId::from("q1");

        let ecid = ExternalCompactionId::generate();
        manager.register_external_compaction(ecid, extent(1), queue);
        assert!(manager.running_external.contains_key(&ecid));

        manager.sweep().await.unwrap();

        assert!(
            !manager.running_external.contains_key(&ecid),
            "no tablet reports this external compaction any more, it should be reconciled away"
        );
    }

    #[tokio::test]
    async fn test_sweep_keeps_external_compaction_still_reported() {
        let source = Arc::new(crate::testing::FakeCompactablesSource::new());
        let manager = manager_with_source(source.clone());
        let queue = ExternalExecutorId::from("q1");

        let ecid = ExternalCompactionId::generate();
        let tablet = crate::testing::FakeCompactable::new(extent(1));
        tablet.set_external_ids(vec![ecid]);
        source.add(tablet);

        manager.register_external_compaction(ecid, extent(1), queue);
        assert!(manager.running_external.contains_key(&ecid));

        manager.sweep().await.unwrap();

        assert!(
            manager.running_external.contains_key(&ecid),
            "the tablet still claims this external compaction, it must survive reconciliation"
        );
    }

    #[test]
    fn test_metrics_sink_reports_zero_when_idle() {
        let manager = manager_with_default_service();
        assert_eq!(manager.compactions_running(), 0);
        assert_eq!(manager.compactions_queued(), 0);
        assert!(manager.external_metrics().is_empty());
    }
}
