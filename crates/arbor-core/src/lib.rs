//! Core shared types for Arbor.
//!
//! This crate is intentionally small: it holds the identifier and path
//! vocabulary that the hierarchy subsystem and the rest of the repository
//! agree on, and nothing else.

mod id;
mod path;

pub use id::{ItemId, NodeId, PropertyId};
pub use path::{Name, Path, PathParseError, PathSegment, INDEX_DEFAULT, INDEX_UNDEFINED};
