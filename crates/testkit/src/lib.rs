//! # ringvault-testkit
//!
//! In-memory port doubles and scripted fakes shared by ringvault test
//! suites. Not part of the shipped binary.

pub mod fakes;
pub mod in_memory;

pub use fakes::{FakeCassandra, FakeRemote, ScriptedPrompt, StartMode};
pub use in_memory::InMemoryStorage;
