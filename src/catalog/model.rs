//! Catalog data model: phases, milestones, and content paths.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of content a creator is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPath {
    Blog,
    Download,
    Course,
}

impl ContentPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blog => "blog",
            Self::Download => "download",
            Self::Course => "course",
        }
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blog" => Ok(Self::Blog),
            "download" => Ok(Self::Download),
            "course" => Ok(Self::Course),
            other => Err(format!("unknown content path: {other}")),
        }
    }
}

/// How the UI prompts a creator to complete a milestone. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    #[default]
    Checkbox,
    Form,
    Upload,
    Link,
    Meeting,
    Signature,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Form => "form",
            Self::Upload => "upload",
            Self::Link => "link",
            Self::Meeting => "meeting",
            Self::Signature => "signature",
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkbox" => Ok(Self::Checkbox),
            "form" => Ok(Self::Form),
            "upload" => Ok(Self::Upload),
            "link" => Ok(Self::Link),
            "meeting" => Ok(Self::Meeting),
            "signature" => Ok(Self::Signature),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// A named, ordered stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Stable key.
    pub id: String,
    pub name: String,
    /// Global phase ordering (unique across phases).
    pub sort_order: i64,
    #[serde(default)]
    pub description: String,
}

impl Phase {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sort_order: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sort_order,
            description: String::new(),
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

/// A unit of work within a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Stable key.
    pub id: String,
    /// Owning phase.
    pub phase_id: String,
    /// Ordering within the phase (unique per phase).
    pub sort_order: i64,
    pub title: String,
    /// Completion requires staff rather than the creator.
    #[serde(default)]
    pub requires_team_action: bool,
    /// Content paths this milestone applies to. Empty means all.
    #[serde(default)]
    pub applies_to: BTreeSet<ContentPath>,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_config: Option<serde_json::Value>,
}

impl Milestone {
    pub fn new(
        id: impl Into<String>,
        phase_id: impl Into<String>,
        sort_order: i64,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            phase_id: phase_id.into(),
            sort_order,
            title: title.into(),
            requires_team_action: false,
            applies_to: BTreeSet::new(),
            action_type: ActionType::default(),
            action_config: None,
        }
    }

    /// Builder: restrict to the given content paths.
    pub fn applies_to(mut self, paths: impl IntoIterator<Item = ContentPath>) -> Self {
        self.applies_to = paths.into_iter().collect();
        self
    }

    /// Builder: mark as team-gated.
    pub fn team_action(mut self) -> Self {
        self.requires_team_action = true;
        self
    }

    /// Builder: set the UI action.
    pub fn with_action(mut self, action_type: ActionType, config: Option<serde_json::Value>) -> Self {
        self.action_type = action_type;
        self.action_config = config;
        self
    }
}
