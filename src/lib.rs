// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Scheduling nucleus for tablet compaction.
//!
//! A tablet server hosts many tablets, each accumulating immutable data
//! files that must periodically be merged. This crate decides *when* a
//! tablet is offered for compaction, *which* configured compaction service
//! it is routed to, and *how* concurrent internal and external (out-of-
//! process) compaction workers share the load. It also tracks live external
//! compactions and reacts to configuration changes without losing in-flight
//! work.
//!
//! The storage engine, the actual compaction I/O, the RPC layer carrying
//! external-compactor calls, and compaction planning policy are all external
//! collaborators, reached only through the traits in [`compaction::compactable`]
//! and [`compaction::planner`].

pub mod compaction;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use error::{Error, Result};
