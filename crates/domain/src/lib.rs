//! # ringvault-domain
//!
//! Domain value objects for the ringvault workspace: validated
//! primitives, backup manifests, cluster tokenmaps, and the storage
//! layout path math. This crate depends only on `ringvault-shared`
//! and performs no I/O.

#![deny(clippy::unwrap_used)]

pub mod layout;
pub mod manifest;
pub mod primitives;
pub mod tokenmap;

pub use layout::{
    parse_timestamp_filename, BackupLayout, BackupMode, IndexEvent, TimestampEntry,
};
pub use manifest::{Manifest, ManifestObject, ManifestSection};
pub use primitives::{
    is_reserved_keyspace, BackupName, NodeFqdn, PrimitiveError, IDENTITY_TABLES,
    RESERVED_KEYSPACES,
};
pub use tokenmap::{RingEntry, TokenMap};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
