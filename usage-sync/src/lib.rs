pub mod config;
pub mod fetch;
pub mod metrics_server;
pub mod observability;
pub mod store;
pub mod sync;
pub mod table;
pub mod window;

pub use sync::{RecoveryPolicy, SyncError, SyncOutcome, Synchronizer};
pub use table::{Schema, UsageRow, UsageTable};
