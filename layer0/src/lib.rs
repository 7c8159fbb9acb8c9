//! # layer0 — Protocol traits for composable agentic AI systems
//!
//! The protocol substrate shared by every `relay-*` crate: universal
//! content blocks, scoped persistence, and the typed ids that key into
//! it.
//!
//! ## The Protocols
//!
//! | Protocol | Trait | What it does |
//! |----------|-------|-------------|
//! | State | [`StateStore`] | How data persists across turns |
//!
//! ## Design Principle
//!
//! Every protocol trait is operation-defined, not mechanism-defined.
//! [`StateStore::read`] means "fetch whatever is stored at this
//! scope/key" — not "query this specific database." This is what makes
//! implementations swappable: an in-memory map and a filesystem tree
//! both implement the same trait.
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for extension data fields
//! (metadata, tool inputs, custom payloads). This is an intentional choice:
//! JSON is the universal interchange format for agentic systems, and
//! `serde_json::Value` is the de facto standard in the Rust ecosystem.
//! The alternative (generic `T: Serialize`) would complicate trait object
//! safety without practical benefit.

#![deny(missing_docs)]

pub mod content;
pub mod effect;
pub mod error;
pub mod id;
pub mod state;

// Re-exports for convenience
pub use content::{Content, ContentBlock};
pub use effect::Scope;
pub use error::StateError;
pub use id::{AgentId, ScopeId, SessionId, WorkflowId};
pub use state::{SearchResult, StateReader, StateStore};
