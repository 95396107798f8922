//! Target model.
//!
//! Every unit a recipe declares is a [`Target`], identified within one
//! registry by its `(kind, name)` pair and handed out as a stable
//! [`TargetId`]. A target is either a placeholder created by a forward
//! reference, or complete with a kind-specific [`TargetBody`].

mod types;

pub use types::*;
