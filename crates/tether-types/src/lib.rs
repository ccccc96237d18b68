//! # tether-types: Core types for `tether`
//!
//! Shared vocabulary for every participant in a two-node-plus-arbiter cluster:
//! - Dynamic roles ([`DynamicRole`]): what a database node is doing right now
//! - Configured roles ([`ConfiguredRole`]): what a node was deployed as
//! - Durable node records ([`NodeRecord`]): the role-of-record and sync flag
//!   a node persists across restarts
//!
//! All roles render lowercase (`active`, `primary`, ...) in logs, on the wire,
//! and in records.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Roles
// ============================================================================

/// The current, mutable classification of a database node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicRole {
    /// Serving writes with a replica attached.
    Active,
    /// Replicating from the active node.
    Backup,
    /// Serving writes with no replica.
    Single,
    /// Never decided since the node was first created.
    Initialized,
    /// No database running on this node.
    Dead,
}

impl DynamicRole {
    /// All dynamic roles, in declaration order.
    pub const ALL: [DynamicRole; 5] = [
        DynamicRole::Active,
        DynamicRole::Backup,
        DynamicRole::Single,
        DynamicRole::Initialized,
        DynamicRole::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DynamicRole::Active => "active",
            DynamicRole::Backup => "backup",
            DynamicRole::Single => "single",
            DynamicRole::Initialized => "initialized",
            DynamicRole::Dead => "dead",
        }
    }

    /// Returns true if a node in this role accepts writes.
    pub fn is_writable(self) -> bool {
        matches!(self, DynamicRole::Active | DynamicRole::Single)
    }
}

impl Display for DynamicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DynamicRole {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DynamicRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RoleParseError::Dynamic(s.to_string()))
    }
}

/// The static role a node is deployed with.
///
/// Only consulted to break the tie when the peer has never been decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredRole {
    Primary,
    Secondary,
    /// The arbiter: no database, never runs a decision engine.
    #[serde(rename = "none")]
    Arbiter,
}

impl ConfiguredRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfiguredRole::Primary => "primary",
            ConfiguredRole::Secondary => "secondary",
            ConfiguredRole::Arbiter => "none",
        }
    }

    /// Returns true if this node manages a database.
    pub fn runs_database(self) -> bool {
        !matches!(self, ConfiguredRole::Arbiter)
    }
}

impl Display for ConfiguredRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfiguredRole {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ConfiguredRole::Primary),
            "secondary" => Ok(ConfiguredRole::Secondary),
            "none" => Ok(ConfiguredRole::Arbiter),
            other => Err(RoleParseError::Configured(other.to_string())),
        }
    }
}

/// Error returned when a role name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleParseError {
    #[error("unknown dynamic role '{0}' (expected active, backup, single, initialized or dead)")]
    Dynamic(String),

    #[error("unknown configured role '{0}' (expected primary, secondary or none)")]
    Configured(String),
}

// ============================================================================
// Records
// ============================================================================

/// The durable role-of-record of a node.
///
/// Written only by the database controller; read by the decision engine and
/// served to remote participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Last dynamic role the controller applied.
    pub role: DynamicRole,
    /// Whether the replica was caught up to the last known active.
    pub synced: bool,
}

impl NodeRecord {
    /// The record of a node that has never been decided.
    pub fn initial() -> Self {
        Self {
            role: DynamicRole::Initialized,
            synced: false,
        }
    }
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self::initial()
    }
}
