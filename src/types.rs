// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Identity types shared across the compaction manager.

use std::fmt;

use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of a configured compaction service, e.g. `"default"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl ServiceId {
    pub const DEFAULT: &'static str = "default";

    pub fn default_service() -> Self {
        ServiceId(Self::DEFAULT.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        ServiceId(s.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        ServiceId(s)
    }
}

/// Name of an external queue drained by out-of-process compactors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalExecutorId(pub String);

impl fmt::Display for ExternalExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExternalExecutorId {
    fn from(s: &str) -> Self {
        ExternalExecutorId(s.to_string())
    }
}

impl From<String> for ExternalExecutorId {
    fn from(s: String) -> Self {
        ExternalExecutorId(s)
    }
}

/// Identity of the remote compactor claiming a reservation, supplied by the
/// caller over the external-compaction RPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompactorId(pub String);

impl fmt::Display for CompactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CompactorId {
    fn from(s: &str) -> Self {
        CompactorId(s.to_string())
    }
}

impl From<String> for CompactorId {
    fn from(s: String) -> Self {
        CompactorId(s)
    }
}

/// An executor a job can be routed to: either a named internal worker group
/// owned by a service, or a shared external queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutorId {
    Internal { service: ServiceId, name: String },
    External(ExternalExecutorId),
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorId::Internal { service, name } => write!(f, "{}/{}", service, name),
            ExecutorId::External(id) => write!(f, "ext:{}", id),
        }
    }
}

/// The closed set of reasons a compaction can be triggered. The manager
/// iterates all of these for every compactable on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompactionKind {
    System,
    Selector,
    User,
    Chop,
}

impl CompactionKind {
    pub const ALL: [CompactionKind; 4] = [
        CompactionKind::System,
        CompactionKind::Selector,
        CompactionKind::User,
        CompactionKind::Chop,
    ];
}

impl fmt::Display for CompactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompactionKind::System => "system",
            CompactionKind::Selector => "selector",
            CompactionKind::User => "user",
            CompactionKind::Chop => "chop",
        };
        write!(f, "{}", s)
    }
}

/// Opaque token minted when an external compaction job is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalCompactionId(pub Uuid);

impl ExternalCompactionId {
    pub fn generate() -> Self {
        ExternalCompactionId(Uuid::new_v4())
    }
}

impl fmt::Display for ExternalCompactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a tablet: table id plus key range. The manager treats this as
/// an opaque, cheaply cloneable value owned by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Extent {
    pub table_id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table:{},range:[{:?},{:?})",
            self.table_id, self.start_key, self.end_key
        )
    }
}
