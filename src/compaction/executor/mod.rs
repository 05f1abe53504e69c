// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

pub mod external;
pub mod internal;
pub mod registry;

pub use external::{ExternalCompactionExecutor, QueueSummary, ReservedJob};
pub use internal::InternalExecutor;
pub use registry::ExternalExecutorRegistry;
