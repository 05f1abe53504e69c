// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! A named compaction service: owns a planner, a set of internal executors,
//! a rate limit, and tracks which external executors it has actually routed
//! jobs to.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::debug;

use super::{
    compactable::{CompactableRef, CompletionNotifier},
    executor::{registry::ExternalExecutorRegistry, InternalExecutor},
    planner::{JobTarget, Planner, PlannerContext, PlannerRegistry},
};
use crate::{
    error::{self, Result},
    types::{CompactionKind, Extent, ExternalExecutorId, ServiceId},
};

/// The out-of-scope collaborator that actually does the merge I/O for jobs
/// dispatched to an internal executor. External jobs are run by a remote
/// compactor and never touch this trait.
#[async_trait]
pub trait CompactionRunner: Send + Sync {
    async fn run(
        &self,
        job_kind: CompactionKind,
        extent: &Extent,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A runner that does nothing and always succeeds; useful for wiring up a
/// service in tests without a real storage engine.
#[derive(Debug, Default)]
pub struct NoopCompactionRunner;

#[async_trait]
impl CompactionRunner for NoopCompactionRunner {
    async fn run(
        &self,
        _job_kind: CompactionKind,
        _extent: &Extent,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

struct ExecutorSpec {
    name: String,
    num_threads: usize,
}

/// Parse the legacy/config `executors` option, shaped like
/// `[{name:'e1',numThreads:2},{name:'e2',numThreads:4}]`. Not real JSON
/// (unquoted/single-quoted keys), so it gets a small dedicated parser rather
/// than pulling in a JSON crate for one option.
fn parse_executor_specs(raw: &str) -> std::result::Result<Vec<ExecutorSpec>, String> {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("executors spec '{}' must be a bracketed list", raw))?;

    let mut specs = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, b) in inner.bytes().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    specs.push(parse_one_executor(&inner[start..=i])?);
                    start = i + 1;
                }
            }
            _ => {}
        }
    }
    Ok(specs)
}

fn parse_one_executor(obj: &str) -> std::result::Result<ExecutorSpec, String> {
    let obj = obj.trim().trim_start_matches(',').trim();
    let obj = obj
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("malformed executor entry '{}'", obj))?;

    let mut name = None;
    let mut num_threads = None;
    for field in obj.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let mut kv = field.splitn(2, ':');
        let key = kv.next().unwrap().trim();
        let value = kv
            .next()
            .ok_or_else(|| format!("malformed field '{}'", field))?
            .trim()
            .trim_matches('\'')
            .trim_matches('"');
        match key {
            "name" => name = Some(value.to_string()),
            "numThreads" => num_threads = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| format!("invalid numThreads '{}'", value))?,
            ),
            _ => {}
        }
    }

    Ok(ExecutorSpec {
        name: name.ok_or_else(|| "executor entry missing 'name'".to_string())?,
        num_threads: num_threads
            .ok_or_else(|| "executor entry missing 'numThreads'".to_string())?,
    })
}

impl std::fmt::Debug for CompactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionService")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

pub struct CompactionService {
    id: ServiceId,
    planner_class: RwLock<String>,
    planner: RwLock<Arc<dyn Planner>>,
    runner: Arc<dyn CompactionRunner>,
    internal_executors: DashMap<String, Arc<InternalExecutor>>,
    external_registry: Arc<ExternalExecutorRegistry>,
    /// Distinct external executors actually routed to by `submit`, not a
    /// configured allowlist — this is what `checkForConfigChanges` consults
    /// before retiring an executor from the registry.
    external_ids_in_use: DashSet<ExternalExecutorId>,
    rate_limit: AtomicU64,
    options: RwLock<HashMap<String, String>>,
    /// Tablets with an internal job currently queued or running in this
    /// service, guarding against re-submission (see DESIGN.md for why this
    /// only covers internal routing).
    pending_internal: DashSet<Extent>,
    running_by_kind: DashMap<CompactionKind, Arc<AtomicU64>>,
    queued_by_kind: DashMap<CompactionKind, Arc<AtomicU64>>,
    stopped: AtomicBool,
}

impl CompactionService {
    pub fn new(
        id: ServiceId,
        planner_class: &str,
        registry: &PlannerRegistry,
        rate_limit: u64,
        options: HashMap<String, String>,
        runner: Arc<dyn CompactionRunner>,
        external_registry: Arc<ExternalExecutorRegistry>,
    ) -> Result<Self> {
        let planner = registry.build(planner_class, &options).ok_or_else(|| {
            error::Error::PlannerInit {
                service: id.to_string(),
                source: Box::<dyn std::error::Error + Send + Sync>::from(format!(
                    "unknown planner class '{}'",
                    planner_class
                )),
            }
        })?;

        let service = Self {
            id,
            planner_class: RwLock::new(planner_class.to_string()),
            planner: RwLock::new(Arc::from(planner)),
            runner,
            internal_executors: DashMap::new(),
            external_registry,
            external_ids_in_use: DashSet::new(),
            rate_limit: AtomicU64::new(rate_limit),
            options: RwLock::new(HashMap::new()),
            pending_internal: DashSet::new(),
            running_by_kind: DashMap::new(),
            queued_by_kind: DashMap::new(),
            stopped: AtomicBool::new(false),
        };
        service.apply_options(options);
        Ok(service)
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    fn apply_options(&self, options: HashMap<String, String>) {
        if let Some(spec) = options.get("executors") {
            match parse_executor_specs(spec) {
                Ok(specs) => {
                    let keep: HashSet<String> = specs.iter().map(|s| s.name.clone()).collect();
                    for spec in specs {
                        self.internal_executors
                            .entry(spec.name.clone())
                            .and_modify(|exec| exec.resize(spec.num_threads))
                            .or_insert_with(|| {
                                Arc::new(InternalExecutor::new(spec.name, spec.num_threads))
                            });
                    }
                    self.internal_executors.retain(|name, exec| {
                        if keep.contains(name) {
                            true
                        } else {
                            exec.stop();
                            false
                        }
                    });
                }
                Err(reason) => {
                    debug!(
                        "service '{}' ignoring malformed executors option: {}",
                        self.id, reason
                    );
                }
            }
        }

        *self.options.write().unwrap() = options;
    }

    /// Applied in-place so in-flight work is never lost; reinstantiates the
    /// planner only if the class actually changed.
    pub fn configuration_changed(
        &self,
        registry: &PlannerRegistry,
        planner_class: &str,
        rate_limit: u64,
        options: HashMap<String, String>,
    ) -> Result<()> {
        let class_changed = *self.planner_class.read().unwrap() != planner_class;
        if class_changed {
            let new_planner = registry.build(planner_class, &options).ok_or_else(|| {
                error::Error::PlannerInit {
                    service: self.id.to_string(),
                    source: Box::<dyn std::error::Error + Send + Sync>::from(format!(
                        "unknown planner class '{}'",
                        planner_class
                    )),
                }
            })?;
            *self.planner.write().unwrap() = Arc::from(new_planner);
            *self.planner_class.write().unwrap() = planner_class.to_string();
        }

        self.rate_limit.store(rate_limit, Ordering::Relaxed);
        self.apply_options(options);
        Ok(())
    }

    pub fn rate_limit(&self) -> u64 {
        self.rate_limit.load(Ordering::Relaxed)
    }

    fn counter(map: &DashMap<CompactionKind, Arc<AtomicU64>>, kind: CompactionKind) -> Arc<AtomicU64> {
        map.entry(kind).or_insert_with(|| Arc::new(AtomicU64::new(0))).clone()
    }

    pub fn is_compaction_queued(&self, extent: &Extent) -> bool {
        self.pending_internal.contains(extent)
    }

    pub fn compactions_running(&self, kind: CompactionKind) -> u64 {
        self.running_by_kind
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn compactions_queued(&self, kind: CompactionKind) -> u64 {
        self.queued_by_kind
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total_compactions_running(&self) -> u64 {
        self.running_by_kind.iter().map(|c| c.value().load(Ordering::Relaxed)).sum()
    }

    pub fn total_compactions_queued(&self) -> u64 {
        self.queued_by_kind.iter().map(|c| c.value().load(Ordering::Relaxed)).sum()
    }

    pub fn external_executors_in_use(&self) -> HashSet<ExternalExecutorId> {
        self.external_ids_in_use.iter().map(|id| id.clone()).collect()
    }

    /// Ask the planner for a job for `kind` on `compactable`. If produced,
    /// route it to an internal executor or an external queue.
    pub fn submit(
        &self,
        kind: CompactionKind,
        compactable: CompactableRef,
        notifier: CompletionNotifier,
    ) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }

        let extent = compactable.extent();
        if self.pending_internal.contains(&extent) {
            return;
        }

        let options = self.options.read().unwrap().clone();
        let rate_limit = self.rate_limit.load(Ordering::Relaxed);
        let planner = self.planner.read().unwrap().clone();
        let ctx = PlannerContext {
            kind,
            extent: &extent,
            options: &options,
            rate_limit,
        };
        let job = match planner.plan(&ctx) {
            Some(job) => job,
            None => return,
        };

        match job.target.clone() {
            JobTarget::Internal(name) => {
                let executor = self
                    .internal_executors
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(InternalExecutor::new(name, 1)))
                    .clone();

                self.pending_internal.insert(extent.clone());
                Self::counter(&self.queued_by_kind, kind).fetch_add(1, Ordering::SeqCst);

                let runner = self.runner.clone();
                let pending = self.pending_internal.clone();
                let running_counter = Self::counter(&self.running_by_kind, kind);
                let queued_counter = Self::counter(&self.queued_by_kind, kind);
                let job_extent = job.extent.clone();
                let notify_compactable = compactable.clone();

                executor.submit(move || async move {
                    queued_counter.fetch_sub(1, Ordering::SeqCst);
                    running_counter.fetch_add(1, Ordering::SeqCst);

                    if let Err(e) = runner.run(kind, &job_extent).await {
                        log::error!(
                            "compaction failed, extent:{}, kind:{}, err:{}",
                            job_extent,
                            kind,
                            e
                        );
                    }

                    running_counter.fetch_sub(1, Ordering::SeqCst);
                    pending.remove(&job_extent);
                    notifier(notify_compactable);
                });
            }
            JobTarget::External(exec_id) => {
                let executor = self.external_registry.get_or_create(&exec_id);
                self.external_ids_in_use.insert(exec_id);
                executor.submit(job.priority, Arc::downgrade(&compactable), job);
            }
        }
    }

    /// Drop any pending state for a vanished tablet.
    pub fn compactable_closed(&self, extent: &Extent) {
        self.pending_internal.remove(extent);
    }

    /// Idempotent: drains no further jobs into internal executors and aborts
    /// anything not yet running.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in self.internal_executors.iter() {
            entry.value().stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering as AtOrdering},
            Mutex,
        },
        time::Duration,
    };

    use super::*;
    use crate::{
        compaction::planner::{CompactionJob, Planner},
        types::ServiceId,
    };

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

    struct NeverPlans;
    impl Planner for NeverPlans {
        fn plan(&self, _ctx: &PlannerContext<'_>) -> Option<CompactionJob> {
            None
        }
    }

    struct FakeTablet(Extent);
    impl crate::compaction::compactable::Compactable for FakeTablet {
        fn extent(&self) -> Extent {
            self.0.clone()
        }
        fn configured_service(
            &self,
            _kind: CompactionKind,
        ) -> std::result::Result<Option<ServiceId>, crate::compaction::compactable::CompactableError> {
            Ok(None)
        }
        fn external_compaction_ids(
            &self,
        ) -> std::result::Result<Vec<crate::types::ExternalCompactionId>, crate::compaction::compactable::CompactableError>
        {
            Ok(vec![])
        }
        fn commit_external_compaction(
            &self,
            _ecid: crate::types::ExternalCompactionId,
            _file_size: u64,
            _entries: u64,
        ) {
        }
        fn external_compaction_failed(&self, _ecid: crate::types::ExternalCompactionId) {}
    }

    fn registry_with(name: &str, planner: fn() -> Box<dyn Planner>) -> PlannerRegistry {
        let mut registry = PlannerRegistry::new();
        registry.register(name.to_string(), move |_opts| planner());
        registry
    }

    fn extent(id: u64) -> Extent {
        Extent {
            table_id: id,
            start_key: vec![],
            end_key: vec![],
        }
    }

    #[tokio::test]
    async fn test_submit_routes_internal_and_notifies() {
        let registry = registry_with("P", || Box::new(AlwaysPlansInternal));
        let mut opts = HashMap::new();
        opts.insert("executors".to_string(), "[{name:'e1',numThreads:2}]".to_string());

        let service = CompactionService::new(
            ServiceId::default_service(),
            "P",
            &registry,
            u64::MAX,
            opts,
            Arc::new(NoopCompactionRunner),
            Arc::new(ExternalExecutorRegistry::new()),
        )
        .unwrap();

        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        let notifier: CompletionNotifier = Arc::new(move |_c| {
            n.fetch_add(1, AtOrdering::SeqCst);
        });

        let compactable: CompactableRef = Arc::new(FakeTablet(extent(1)));
        service.submit(CompactionKind::User, compactable.clone(), notifier);

        assert!(service.is_compaction_queued(&extent(1)));
        assert_eq!(service.total_compactions_queued(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!service.is_compaction_queued(&extent(1)));
        assert_eq!(service.total_compactions_running(), 0);
        assert_eq!(notified.load(AtOrdering::SeqCst), 1);
    }

    #[test]
    fn test_submit_skips_when_no_job_produced() {
        let registry = registry_with("P", || Box::new(NeverPlans));
        let service = CompactionService::new(
            ServiceId::default_service(),
            "P",
            &registry,
            u64::MAX,
            HashMap::new(),
            Arc::new(NoopCompactionRunner),
            Arc::new(ExternalExecutorRegistry::new()),
        )
        .unwrap();

        let notifier: CompletionNotifier = Arc::new(|_c| panic!("should not be called"));
        let compactable: CompactableRef = Arc::new(FakeTablet(extent(1)));
        service.submit(CompactionKind::User, compactable, notifier);

        assert!(!service.is_compaction_queued(&extent(1)));
    }

    #[tokio::test]
    async fn test_submit_deduplicates_pending_extent() {
        let calls = Arc::new(Mutex::new(0usize));
        struct CountingPlanner(Arc<Mutex<usize>>);
        impl Planner for CountingPlanner {
            fn plan(&self, ctx: &PlannerContext<'_>) -> Option<CompactionJob> {
                *self.0.lock().unwrap() += 1;
                Some(CompactionJob {
                    kind: ctx.kind,
                    extent: ctx.extent.clone(),
                    priority: 1,
                    target: JobTarget::Internal("e1".to_string()),
                    estimated_input_bytes: 0,
                })
            }
        }

        let mut registry = PlannerRegistry::new();
        let calls_for_ctor = calls.clone();
        registry.register("P", move |_opts| {
            Box::new(CountingPlanner(calls_for_ctor.clone())) as Box<dyn Planner>
        });

        let mut opts = HashMap::new();
        opts.insert("executors".to_string(), "[{name:'e1',numThreads:1}]".to_string());
        let service = CompactionService::new(
            ServiceId::default_service(),
            "P",
            &registry,
            u64::MAX,
            opts,
            Arc::new(NoopCompactionRunner),
            Arc::new(ExternalExecutorRegistry::new()),
        )
        .unwrap();

        let notifier: CompletionNotifier = Arc::new(|_c| {});
        let compactable: CompactableRef = Arc::new(FakeTablet(extent(1)));
        service.submit(CompactionKind::User, compactable.clone(), notifier.clone());
        service.submit(CompactionKind::User, compactable, notifier);

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let registry = registry_with("P", || Box::new(NeverPlans));
        let service = CompactionService::new(
            ServiceId::default_service(),
            "P",
            &registry,
            u64::MAX,
            HashMap::new(),
            Arc::new(NoopCompactionRunner),
            Arc::new(ExternalExecutorRegistry::new()),
        )
        .unwrap();
        service.stop();
        service.stop();
    }

    #[test]
    fn test_external_routing_marks_executor_in_use() {
        struct AlwaysPlansExternal;
        impl Planner for AlwaysPlansExternal {
            fn plan(&self, ctx: &PlannerContext<'_>) -> Option<CompactionJob> {
                Some(CompactionJob {
                    kind: ctx.kind,
                    extent: ctx.extent.clone(),
                    priority: 1,
                    target: JobTarget::External(ExternalExecutorId::from("q1")),
                    estimated_input_bytes: 0,
                })
            }
        }

        let registry = registry_with("P", || Box::new(AlwaysPlansExternal));
        let service = CompactionService::new(
            ServiceId::default_service(),
            "P",
            &registry,
            u64::MAX,
            HashMap::new(),
            Arc::new(NoopCompactionRunner),
            Arc::new(ExternalExecutorRegistry::new()),
        )
        .unwrap();

        assert!(service.external_executors_in_use().is_empty());

        let notifier: CompletionNotifier = Arc::new(|_c| {});
        let compactable: CompactableRef = Arc::new(FakeTablet(extent(1)));
        service.submit(CompactionKind::User, compactable, notifier);

        assert_eq!(
            service.external_executors_in_use(),
            HashSet::from([ExternalExecutorId::from("q1")])
        );
    }

    #[test]
    fn test_unknown_planner_class_fails_construction() {
        let registry = PlannerRegistry::new();
        let err = CompactionService::new(
            ServiceId::default_service(),
            "NoSuchPlanner",
            &registry,
            u64::MAX,
            HashMap::new(),
            Arc::new(NoopCompactionRunner),
            Arc::new(ExternalExecutorRegistry::new()),
        )
        .unwrap_err();
        assert!(matches!(err, error::Error::PlannerInit { .. }));
    }
}
