//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory. They are serialised to/from the JSON `definition` column of
//! the `workflows` table.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Bits of [`Trigger::Collection::mode`].
pub mod trigger_mode {
    pub const CREATE: u8 = 1;
    pub const UPDATE: u8 = 2;
}

fn default_trigger_mode() -> u8 {
    trigger_mode::CREATE
}

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fired when a record of `collection` is created and/or updated.
    Collection {
        collection: String,
        /// Bitmask of [`trigger_mode`] events.
        #[serde(default = "default_trigger_mode")]
        mode: u8,
    },
    /// Started explicitly through the executor.
    Manual,
}

impl Trigger {
    /// Whether a `event` (one [`trigger_mode`] bit) on `collection` fires
    /// this trigger.
    pub fn fires_on(&self, collection: &str, event: u8) -> bool {
        match self {
            Self::Collection { collection: watched, mode } => watched == collection && mode & event != 0,
            Self::Manual => false,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Stable name other nodes use in `{{$jobsMapByNodeKey.<key>}}`.
    pub key: String,
    /// Maps to a registered `Instruction` implementation.
    #[serde(rename = "type", alias = "node_type")]
    pub node_type: String,
    /// Instruction-specific configuration, opaque to the engine.
    #[serde(default)]
    pub config: Value,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, key: impl Into<String>, node_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            node_type: node_type.into(),
            config,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

fn enabled_by_default() -> bool {
    true
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub trigger: Trigger,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(
        title: impl Into<String>,
        trigger: Trigger,
        nodes: Vec<NodeDefinition>,
        edges: Vec<Edge>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            enabled: true,
            trigger,
            nodes,
            edges,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Status of a whole execution, persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Resolved,
    Failed,
    Error,
    Aborted,
}

impl ExecutionStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Started => 0,
            Self::Resolved => 1,
            Self::Failed => -1,
            Self::Error => -2,
            Self::Aborted => -3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Started,
            1 => Self::Resolved,
            -1 => Self::Failed,
            -2 => Self::Error,
            -3 => Self::Aborted,
            _ => return None,
        })
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "STARTED",
            Self::Resolved => "RESOLVED",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
        })
    }
}
