//! Client-side model of the partner energy-monitoring API.
//!
//! The transport is not part of this crate: callers implement [`PartnerApi`]
//! for whatever channel they have. [`SnapshotApi`] serves the same calls from
//! a JSON snapshot on disk.

pub mod api;
pub mod domain;
pub mod snapshot;

pub use api::{ApiError, AuthToken, Credentials, PartnerApi, UsageRequest};
pub use snapshot::SnapshotApi;
