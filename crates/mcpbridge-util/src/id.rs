//! ULID-based identifier generation with prefixes.
//!
//! Identifiers in mcpbridge follow the pattern: `prefix_ulid`
//! For example: `tsk_01hqxyz...` for tasks. The ULID supplies both the
//! time component and the random suffix, so two identifiers minted in the
//! same millisecond still differ.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Task,
    ToolCall,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Task => "tsk",
            IdPrefix::ToolCall => "call",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tsk" => Some(IdPrefix::Task),
            "call" => Some(IdPrefix::ToolCall),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        Self::with_ulid(prefix, Ulid::new())
    }

    /// Generate an identifier with a specific ULID (for testing or imports).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, ulid) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let ulid = Ulid::from_string(ulid).ok()?;
        Some((prefix, ulid))
    }

    /// Check if an identifier has the expected prefix.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('_'))
    }

    /// Generate a task ID.
    pub fn task() -> String {
        Self::ascending(IdPrefix::Task)
    }

    /// Generate a tool call ID for providers that omit one.
    pub fn tool_call() -> String {
        Self::ascending(IdPrefix::ToolCall)
    }
}
