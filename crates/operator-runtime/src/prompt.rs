//! System prompt assembly: organization status, role persona, tool catalog.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use operator_core::{OperatorError, Result, Tool};
use serde::{Deserialize, Serialize};

/// Agent mode: the model plans with tools and explains its results.
const AGENT_PROMPT_TEMPLATE: &str = r#"You are the AI operator of a kindergarten management system. {persona}

## Organization
{organization}

## Tools
{tools}

## Principles
- **Data comes from tools.** Never invent names, counts or dates. If a tool can answer, call it.
- **Cheapest tool first.** Plain listings use `read_data_record`; conditions, sorting, statistics and joins use `any_query`.
- **Show, then say.** When the user asks to see something, render it with `render_component` and keep the text short.
- **Navigate on request.** Use `navigate_to_page` only when the user asks to go somewhere.
- **Answer in the user's language.**{page}"#;

/// Direct mode: one-shot answers, no multi-step planning.
const DIRECT_PROMPT_TEMPLATE: &str = r#"You are the AI operator of a kindergarten management system. {persona}

## Organization
{organization}

## Tools
{tools}

Answer directly. Call at most one tool, and only when the answer needs live data. Answer in the user's language.{page}"#;

/// Template variant for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    Agent,
    Direct,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::Agent => "agent",
            PromptMode::Direct => "direct",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            PromptMode::Agent => AGENT_PROMPT_TEMPLATE,
            PromptMode::Direct => DIRECT_PROMPT_TEMPLATE,
        }
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptMode {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "agent" => Ok(PromptMode::Agent),
            "direct" => Ok(PromptMode::Direct),
            other => Err(OperatorError::InvalidParameter(format!(
                "unknown prompt mode '{other}' (expected agent or direct)"
            ))),
        }
    }
}

/// Persona line for a caller role.
pub fn persona(role: &str) -> &'static str {
    match role {
        "admin" => {
            "You assist a system administrator who manages every kindergarten, account and \
             setting. Be precise and complete."
        }
        "principal" => {
            "You assist the principal. Focus on enrollment, staffing, attendance trends and \
             anything that needs a decision."
        }
        "teacher" => {
            "You assist a class teacher. Focus on their classes, the children in them and \
             day-to-day activities."
        }
        "parent" => {
            "You assist a parent. Only discuss their own children and school-wide notices, \
             in a warm and simple tone."
        }
        _ => "You assist a staff member of the kindergarten.",
    }
}

/// Point-in-time figures about one organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSnapshot {
    pub organization_id: String,
    pub name: String,
    pub student_count: u32,
    pub class_count: u32,
    pub teacher_count: u32,
    /// Enrolled students over capacity, 0.0 to 1.0.
    pub enrollment_rate: Option<f32>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl OrganizationSnapshot {
    pub fn new(organization_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_counts(mut self, students: u32, classes: u32, teachers: u32) -> Self {
        self.student_count = students;
        self.class_count = classes;
        self.teacher_count = teachers;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Status block for the system prompt.
    pub fn status_text(&self) -> String {
        let name = if self.name.is_empty() {
            "(unnamed organization)"
        } else {
            &self.name
        };
        let mut out = format!(
            "- **Name:** {name}\n- **Students:** {}\n- **Classes:** {}\n- **Teachers:** {}",
            self.student_count, self.class_count, self.teacher_count
        );
        if let Some(rate) = self.enrollment_rate {
            out.push_str(&format!("\n- **Enrollment:** {:.0}%", rate * 100.0));
        }
        for note in &self.notes {
            out.push_str(&format!("\n- {note}"));
        }
        out
    }
}

/// Where organization figures come from. The operator only reads them when
/// the prompt cache misses.
#[async_trait]
pub trait OrganizationSource: Send + Sync {
    async fn snapshot(&self, organization_id: Option<&str>) -> Result<OrganizationSnapshot>;
}

/// Fixed snapshots keyed by organization id, for the CLI and tests.
#[derive(Debug, Default)]
pub struct StaticOrganizationSource {
    snapshots: HashMap<String, OrganizationSnapshot>,
    fallback: OrganizationSnapshot,
    lookups: AtomicUsize,
}

impl StaticOrganizationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: OrganizationSnapshot) -> Self {
        self.snapshots.insert(snapshot.organization_id.clone(), snapshot);
        self
    }

    /// Snapshot returned for requests without an organization id.
    pub fn with_fallback(mut self, snapshot: OrganizationSnapshot) -> Self {
        self.fallback = snapshot;
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrganizationSource for StaticOrganizationSource {
    async fn snapshot(&self, organization_id: Option<&str>) -> Result<OrganizationSnapshot> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        match organization_id {
            None => Ok(self.fallback.clone()),
            Some(id) => self
                .snapshots
                .get(id)
                .cloned()
                .ok_or_else(|| OperatorError::NotFound(format!("organization '{id}'"))),
        }
    }
}

fn tool_list(tools: &[&Tool]) -> String {
    if tools.is_empty() {
        return "No tools are available. Answer from the conversation only.".into();
    }
    tools
        .iter()
        .map(|t| format!("- `{}`: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assemble the system prompt for a role.
pub fn build_system_prompt(
    role: &str,
    mode: PromptMode,
    organization: &OrganizationSnapshot,
    tools: &[&Tool],
    page: Option<&str>,
) -> String {
    let page = match page {
        Some(p) if !p.trim().is_empty() => format!("\n\nThe user is currently on page `{p}`."),
        _ => String::new(),
    };
    mode.template()
        .replace("{persona}", persona(role))
        .replace("{organization}", &organization.status_text())
        .replace("{tools}", &tool_list(tools))
        .replace("{page}", &page)
}
