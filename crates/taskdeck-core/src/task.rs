use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::trace;

use crate::error::{ClientError, ClientResult};

pub const DUE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    /// Accepts the spellings the backend and spreadsheets use; anything else is `None`.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Some(Priority::Low),
            "m" | "med" | "medium" => Some(Priority::Medium),
            "h" | "high" => Some(Priority::High),
            _ => None,
        }
    }

    /// Unknown values (including the import placeholder) fall back to `Low`.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse_loose(raw).unwrap_or_else(|| {
            trace!(value = %raw, "unrecognized priority, using default");
            Priority::default()
        })
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_loose(s).ok_or_else(|| anyhow!("invalid priority {s:?}; expected Low, Medium or High"))
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(Priority::parse_or_default)
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrText {
    Bool(bool),
    Text(String),
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BoolOrText>::deserialize(deserializer)?;
    Ok(match raw {
        Some(BoolOrText::Bool(value)) => value,
        Some(BoolOrText::Text(text)) => text.trim().eq_ignore_ascii_case("true"),
        None => false,
    })
}

/// A task as the backend returns it. `id` only ever comes from the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "userId", default)]
    pub owner_id: String,

    pub task_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub due_date: String,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    /// All field values joined by a space, lower-cased. This is what the table search matches.
    pub fn search_haystack(&self) -> String {
        let mut parts: Vec<String> = vec![
            self.id.clone(),
            self.owner_id.clone(),
            self.task_name.clone(),
            self.description.clone(),
            self.due_date.clone(),
            self.priority.to_string(),
            self.completed.to_string(),
        ];
        for value in self.extra.values() {
            match value {
                serde_json::Value::String(text) => parts.push(text.clone()),
                serde_json::Value::Null => {}
                other => parts.push(other.to_string()),
            }
        }
        parts.join(" ").to_lowercase()
    }

    pub fn due(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.due_date.trim(), DUE_DATE_FORMAT).ok()
    }

    pub fn validate(&self) -> ClientResult<()> {
        require_fields(&self.task_name, &self.description, &self.due_date)
    }
}

/// Create payload: a task without an id, owned by `owner_id`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(rename = "userId")]
    pub owner_id: String,
    pub task_name: String,
    pub description: String,
    pub due_date: String,
    pub priority: Priority,
    pub completed: bool,
}

/// Fields a user fills in to create a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskForm {
    pub task_name: String,
    pub description: String,
    pub due_date: String,
    pub priority: Priority,
    pub completed: bool,
}

impl TaskForm {
    pub fn validate(&self) -> ClientResult<()> {
        require_fields(&self.task_name, &self.description, &self.due_date)
    }

    pub fn into_new_task(self, owner_id: String) -> NewTask {
        NewTask {
            owner_id,
            task_name: self.task_name,
            description: self.description,
            due_date: self.due_date,
            priority: self.priority,
            completed: self.completed,
        }
    }
}

/// Edits applied on top of an existing task before a full replace.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        self.task_name.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
            && self.completed.is_none()
    }

    pub fn apply(self, task: &mut Task) {
        if let Some(task_name) = self.task_name {
            task.task_name = task_name;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

fn require_fields(task_name: &str, description: &str, due_date: &str) -> ClientResult<()> {
    if task_name.trim().is_empty() {
        return Err(ClientError::ValidationRequired("task name".to_string()));
    }
    if description.trim().is_empty() {
        return Err(ClientError::ValidationRequired("description".to_string()));
    }
    if due_date.trim().is_empty() {
        return Err(ClientError::ValidationRequired("due date".to_string()));
    }
    if NaiveDate::parse_from_str(due_date.trim(), DUE_DATE_FORMAT).is_err() {
        return Err(ClientError::ValidationRequired(format!(
            "due date as YYYY-MM-DD (got {due_date:?})"
        )));
    }
    Ok(())
}
