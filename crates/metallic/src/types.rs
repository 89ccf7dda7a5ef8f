//! Control-plane REST payloads.
//!
//! Deserialization structs matching the Metallic API's JSON. Snapshots are
//! plain values; the SDK never mutates them in place.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Base template slug that adds a headless browser.
pub const BROWSER_TEMPLATE: &str = "metallic-browser";
/// Base template slug that adds a code interpreter.
pub const CODE_INTERPRETER_TEMPLATE: &str = "metallic-code-interpreter";
/// Base template slug with no extra tools.
pub const BASE_TEMPLATE: &str = "metallic-base";

/// Lifecycle state of a computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputerState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Replacing,
    Destroying,
    Destroyed,
    /// A state this SDK version does not know about.
    #[serde(other)]
    Unknown,
}

impl ComputerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Replacing => "replacing",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ComputerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "starting" => Ok(Self::Starting),
            "started" => Ok(Self::Started),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "replacing" => Ok(Self::Replacing),
            "destroying" => Ok(Self::Destroying),
            "destroyed" => Ok(Self::Destroyed),
            other => Err(format!("unknown computer state: {other}")),
        }
    }
}

/// Image definition a computer is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub slug: String,
    #[serde(default)]
    pub image: Option<String>,
    /// One of the `metallic-*` base slugs.
    #[serde(default)]
    pub base_template: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// A computer's template, either expanded or as a bare slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateRef {
    Expanded(Box<Template>),
    Slug(String),
}

impl TemplateRef {
    pub fn slug(&self) -> &str {
        match self {
            Self::Expanded(t) => &t.slug,
            Self::Slug(s) => s,
        }
    }

    /// Base template, falling back to the slug itself when not expanded.
    pub fn base_template(&self) -> &str {
        match self {
            Self::Expanded(t) => t.base_template.as_deref().unwrap_or(&t.slug),
            Self::Slug(s) => s,
        }
    }
}

/// Computer as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerRecord {
    #[serde(default)]
    pub object: String,
    pub id: String,
    pub template: TemplateRef,
    pub virtual_machine_id: String,
    #[serde(default)]
    pub instance: Option<String>,
    pub state: ComputerState,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub inactivity_timeout_ms: Option<u64>,
    #[serde(default)]
    pub auto_destroy: bool,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub object: String,
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerDestroyed {
    #[serde(default)]
    pub object: String,
    pub id: String,
    pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDestroyed {
    #[serde(default)]
    pub object: String,
    pub slug: String,
    pub destroyed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateComputerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_launch: Option<bool>,
}

impl CreateComputerOptions {
    pub fn template(slug: impl Into<String>) -> Self {
        Self {
            template: Some(slug.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateComputerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateTemplateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Pagination parameters for list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl ListOptions {
    /// Query pairs for the set fields only.
    pub(crate) fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(limit) = self.limit {
            q.push(("limit", limit.to_string()));
        }
        if let Some(order) = self.order {
            let v = match order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            q.push(("order", v.to_string()));
        }
        if let Some(after) = &self.after {
            q.push(("after", after.clone()));
        }
        if let Some(before) = &self.before {
            q.push(("before", before.clone()));
        }
        q
    }
}
