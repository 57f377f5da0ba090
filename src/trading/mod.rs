//! Replication pipeline: detect new source orders, drop self-copies,
//! transform and fan out to destinations.

mod config;
mod detector;
mod dispatcher;
mod self_copy;
mod transformer;

pub use config::{ExecutionStyle, ReplicationConfig};
pub use detector::{NewOrderDetector, OrderSnapshotStore};
pub use dispatcher::{CopyOutcome, CopyReport, ReplicationDispatcher};
pub use self_copy::{
    filter_self_copies, CopiedOrderLedger, FilterOutcome, SelfCopyMatch, SELF_COPY_TAG,
};
pub use transformer::{OrderTransformer, TransformError};
