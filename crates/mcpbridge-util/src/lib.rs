//! Shared utilities for mcpbridge.
//!
//! This crate provides common utilities used across the mcpbridge workspace:
//! - ULID-based identifier generation
//! - Logging setup with tracing

pub mod id;
pub mod log;

pub use id::Identifier;
