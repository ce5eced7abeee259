//! # ringvault-infra
//!
//! Adapter selection and composition: turns a validated config into
//! the wired application context the CLI verbs run against.

pub mod composition;
pub mod storage_factory;

pub use composition::AppContext;
pub use storage_factory::build_storage;
