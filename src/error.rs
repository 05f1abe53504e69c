// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Crate-wide error definitions.

use snafu::Snafu;

use crate::types::{Extent, ExternalCompactionId};

#[macro_export]
macro_rules! define_result {
    ($t:ty) => {
        pub type Result<T> = std::result::Result<T, $t>;
    };
}

define_result!(Error);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Malformed compaction service config, key:{}, reason:{}",
        key,
        reason
    ))]
    MalformedConfig { key: String, reason: String },

    #[snafu(display(
        "Service '{}' referenced by options has no matching planner entry",
        service
    ))]
    DanglingServiceOptions { service: String },

    #[snafu(display(
        "Extent mismatch on external compaction {}, stored:{:?}, given:{:?}",
        ecid,
        stored,
        given
    ))]
    ExtentMismatch {
        ecid: ExternalCompactionId,
        stored: Extent,
        given: Extent,
    },

    #[snafu(display("Failed to construct planner for service '{}', err:{}", service, source))]
    PlannerInit {
        service: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("Compactable call failed during scheduling, err:{}", source))]
    CompactableFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("Compaction scheduler channel closed unexpectedly"))]
    ChannelClosed,
}
