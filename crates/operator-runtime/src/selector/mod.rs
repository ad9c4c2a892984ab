//! Per-turn tool selection.
//!
//! `select` is a pure function of the query text, the caller's role and the
//! [`SelectorConfig`]: features come from the keyword table in [`rules`],
//! scores from the weight table plus the boost rules in [`scoring`].

pub mod rules;
pub mod scoring;

use std::fmt;

use operator_config::SelectorConfig;
use serde::Serialize;

pub use rules::{Feature, FeatureSet, extract_features};
pub use scoring::{BOOST_RULES, ToolScore};

/// Diagnostic breakdown of one selection.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub query: String,
    pub role: String,
    pub features: FeatureSet,
    /// Every weighted tool, best first.
    pub scores: Vec<ToolScore>,
    pub selected: Vec<String>,
    /// Whether the fallback tool set was used.
    pub fallback: bool,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "query:    {}", self.query)?;
        writeln!(f, "role:     {}", self.role)?;
        writeln!(f, "features: {}", self.features)?;
        for (feature, keyword) in &self.features.matched {
            writeln!(f, "  {feature:<10} matched \"{keyword}\"")?;
        }
        writeln!(f, "scores:")?;
        for s in &self.scores {
            let rules = if s.rules.is_empty() {
                String::new()
            } else {
                format!(" [{}]", s.rules.join(", "))
            };
            let denied = if s.admissible { "" } else { " (not allowed for role)" };
            writeln!(
                f,
                "  {:<18} {:>8.1} = {:.1} + {:.1}{rules}{denied}",
                s.tool,
                s.total(),
                s.base,
                s.boost
            )?;
        }
        let fallback = if self.fallback { " (fallback)" } else { "" };
        write!(f, "selected: {}{fallback}", self.selected.join(", "))
    }
}

/// Ranks the tool catalog for a query.
#[derive(Debug, Clone)]
pub struct ToolSelector {
    config: SelectorConfig,
}

impl ToolSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Whether `role` may be offered `tool`. Roles without an allowlist may
    /// receive every tool.
    pub fn is_admissible(&self, role: &str, tool: &str) -> bool {
        match self.config.role_tools.get(role) {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }

    /// Weighted tools the role may receive, weight order.
    pub fn admissible_tools(&self, role: &str) -> Vec<String> {
        let mut tools: Vec<(&String, f32)> = self
            .config
            .weights
            .iter()
            .filter(|(tool, _)| self.is_admissible(role, tool))
            .map(|(tool, w)| (tool, *w))
            .collect();
        tools.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        tools.into_iter().map(|(t, _)| t.clone()).collect()
    }

    /// Ordered tool identifiers for this turn, at most `max_tools`.
    pub fn select(&self, query: &str, role: &str, max_tools: usize) -> Vec<String> {
        let mut selected = self.explain(query, role).selected;
        selected.truncate(max_tools);
        selected
    }

    /// Full breakdown: features, scores, and the untruncated selection.
    pub fn explain(&self, query: &str, role: &str) -> Explanation {
        let query_text = query.trim();
        let features = if query_text.is_empty() {
            FeatureSet::default()
        } else {
            extract_features(query_text)
        };
        let scores = scoring::score_tools(&self.config.weights, &features, BOOST_RULES, |tool| {
            self.is_admissible(role, tool)
        });

        let ranked: Vec<String> = scores
            .iter()
            .filter(|s| s.admissible)
            .map(|s| s.tool.clone())
            .collect();

        let fallback = query_text.is_empty() || ranked.is_empty();
        let selected = if fallback {
            self.config.fallback_tools.clone()
        } else {
            ranked
        };

        Explanation {
            query: query_text.to_string(),
            role: role.to_string(),
            features,
            scores,
            selected,
            fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operator_core::tool::{ANY_QUERY, NAVIGATE_TO_PAGE, READ_DATA_RECORD, RENDER_COMPONENT};

    #[test]
    fn test_empty_query_falls_back() {
        let selector = ToolSelector::new(SelectorConfig::default());
        let e = selector.explain("   ", "admin");
        assert!(e.fallback);
        assert_eq!(e.selected, vec![READ_DATA_RECORD]);
    }

    #[test]
    fn test_role_without_allowlist_gets_everything() {
        let selector = ToolSelector::new(SelectorConfig::default());
        assert_eq!(
            selector.admissible_tools("principal"),
            vec![READ_DATA_RECORD, ANY_QUERY, RENDER_COMPONENT, NAVIGATE_TO_PAGE]
        );
        assert_eq!(
            selector.admissible_tools("parent"),
            vec![READ_DATA_RECORD, RENDER_COMPONENT, NAVIGATE_TO_PAGE]
        );
    }

    #[test]
    fn test_explanation_renders() {
        let selector = ToolSelector::new(SelectorConfig::default());
        let text = selector.explain("show a chart of student counts", "admin").to_string();
        assert!(text.contains("features: aggregate, render"));
        assert!(text.contains("render-first"));
        assert!(text.starts_with("query:"));
    }
}
