// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Pull-model metrics, registered with the host process's `prometheus`
//! registry the way the host repository's server crate registers its own
//! gauges. Collection snapshots the concurrent maps; it never blocks on the
//! scheduler loop.

use std::collections::HashMap;

use prometheus::{
    core::{Collector, Desc},
    proto::MetricFamily,
    Opts,
};

use crate::types::ExternalExecutorId;

/// One external executor's queue/running depth at the moment of collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalExecutorMetrics {
    pub id: ExternalExecutorId,
    pub queued: u64,
    pub running: u64,
}

/// Supplies the current [`ExternalExecutorMetrics`] for every external
/// executor that is either registered or referenced by a running entry.
/// Implemented by [`CompactionManager`](crate::compaction::manager::CompactionManager).
pub trait MetricsSink: Send + Sync {
    fn compactions_running(&self) -> u64;
    fn compactions_queued(&self) -> u64;
    fn external_metrics(&self) -> Vec<ExternalExecutorMetrics>;
}

fn desc(name: &str, help: &str) -> Desc {
    Desc::new(name.to_string(), help.to_string(), vec![], HashMap::new())
        .expect("static metric name/help is well-formed")
}

fn labeled_desc(name: &str, help: &str, label: &str) -> Desc {
    Desc::new(
        name.to_string(),
        help.to_string(),
        vec![label.to_string()],
        HashMap::new(),
    )
    .expect("static metric name/help is well-formed")
}

/// Bridges a [`MetricsSink`] into a `prometheus::core::Collector`: one gauge
/// for total running, one for total queued, and a `queue`-labeled pair for
/// per-external-executor depth.
pub struct MetricsAdapter {
    sink: std::sync::Arc<dyn MetricsSink>,
    running_desc: Desc,
    queued_desc: Desc,
    external_queued_desc: Desc,
    external_running_desc: Desc,
}

impl MetricsAdapter {
    pub fn new(sink: std::sync::Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            running_desc: desc(
                "compaction_manager_compactions_running",
                "Number of compactions currently running across all services.",
            ),
            queued_desc: desc(
                "compaction_manager_compactions_queued",
                "Number of compactions currently queued across all services.",
            ),
            external_queued_desc: labeled_desc(
                "compaction_manager_external_queued",
                "Number of jobs queued per external executor.",
                "queue",
            ),
            external_running_desc: labeled_desc(
                "compaction_manager_external_running",
                "Number of jobs currently running per external executor.",
                "queue",
            ),
        }
    }
}

impl Collector for MetricsAdapter {
    fn desc(&self) -> Vec<&Desc> {
        vec![
            &self.running_desc,
            &self.queued_desc,
            &self.external_queued_desc,
            &self.external_running_desc,
        ]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let running = prometheus::Gauge::with_opts(Opts::new(
            self.running_desc.fq_name.clone(),
            self.running_desc.help.clone(),
        ))
        .expect("metric name/help were already validated in new()");
        running.set(self.sink.compactions_running() as f64);

        let queued = prometheus::Gauge::with_opts(Opts::new(
            self.queued_desc.fq_name.clone(),
            self.queued_desc.help.clone(),
        ))
        .expect("metric name/help were already validated in new()");
        queued.set(self.sink.compactions_queued() as f64);

        let mut families = vec![running.collect()[0].clone(), queued.collect()[0].clone()];

        let external_queued = prometheus::GaugeVec::new(
            Opts::new(
                self.external_queued_desc.fq_name.clone(),
                self.external_queued_desc.help.clone(),
            ),
            &["queue"],
        )
        .expect("metric name/help were already validated in new()");
        let external_running = prometheus::GaugeVec::new(
            Opts::new(
                self.external_running_desc.fq_name.clone(),
                self.external_running_desc.help.clone(),
            ),
            &["queue"],
        )
        .expect("metric name/help were already validated in new()");

        for m in self.sink.external_metrics() {
            let id = m.id.to_string();
            external_queued
                .with_label_values(&[&id])
                .set(m.queued as f64);
            external_running
                .with_label_values(&[&id])
                .set(m.running as f64);
        }

        families.extend(external_queued.collect());
        families.extend(external_running.collect());
        families
    }
}
