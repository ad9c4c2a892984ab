//! Scoring: base weights plus declarative boost rules.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use operator_core::tool::{ANY_QUERY, NAVIGATE_TO_PAGE, READ_DATA_RECORD, RENDER_COMPONENT};
use serde::Serialize;

use super::rules::{Feature, FeatureSet};

/// Lifts a tool above every base weight.
pub const BOOST_TOP: f32 = 1000.0;
/// Second place, below a `BOOST_TOP` tool.
pub const BOOST_SECOND: f32 = 500.0;
/// Orders one data tool above the other without reaching the intent tiers.
pub const BOOST_PREFER: f32 = 100.0;

/// When a boost rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Navigation verbs and no rendering verbs.
    NavigationOnly,
    /// Any rendering verb.
    Render,
    /// Both navigation and rendering verbs.
    NavigationAndRender,
    /// No navigation, no rendering, no data features.
    PlainRead,
    /// At least one of filter, sort, aggregate, join.
    DataFeatures,
}

impl Condition {
    pub fn holds(&self, f: &FeatureSet) -> bool {
        let nav = f.has(Feature::Navigation);
        let render = f.has(Feature::Render);
        match self {
            Condition::NavigationOnly => nav && !render,
            Condition::Render => render,
            Condition::NavigationAndRender => nav && render,
            Condition::PlainRead => !nav && !render && !f.has_data(),
            Condition::DataFeatures => f.has_data(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoostRule {
    pub name: &'static str,
    pub when: Condition,
    pub tool: &'static str,
    pub boost: f32,
}

/// Boost rules, evaluated independently; every rule whose condition holds
/// adds its boost.
pub const BOOST_RULES: &[BoostRule] = &[
    BoostRule {
        name: "navigation-first",
        when: Condition::NavigationOnly,
        tool: NAVIGATE_TO_PAGE,
        boost: BOOST_TOP,
    },
    BoostRule {
        name: "render-first",
        when: Condition::Render,
        tool: RENDER_COMPONENT,
        boost: BOOST_TOP,
    },
    BoostRule {
        name: "navigation-after-render",
        when: Condition::NavigationAndRender,
        tool: NAVIGATE_TO_PAGE,
        boost: BOOST_SECOND,
    },
    BoostRule {
        name: "plain-read",
        when: Condition::PlainRead,
        tool: READ_DATA_RECORD,
        boost: BOOST_PREFER,
    },
    BoostRule {
        name: "data-query",
        when: Condition::DataFeatures,
        tool: ANY_QUERY,
        boost: BOOST_PREFER,
    },
];

/// Score breakdown for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolScore {
    pub tool: String,
    pub base: f32,
    pub boost: f32,
    /// Names of the boost rules that fired for this tool.
    pub rules: Vec<&'static str>,
    pub admissible: bool,
}

impl ToolScore {
    pub fn total(&self) -> f32 {
        self.base + self.boost
    }
}

/// Higher total first, then higher base weight, then name.
fn rank(a: &ToolScore, b: &ToolScore) -> Ordering {
    b.total()
        .total_cmp(&a.total())
        .then_with(|| b.base.total_cmp(&a.base))
        .then_with(|| a.tool.cmp(&b.tool))
}

/// Score every weighted tool against the extracted features, best first.
pub fn score_tools(
    weights: &BTreeMap<String, f32>,
    features: &FeatureSet,
    rules: &[BoostRule],
    admissible: impl Fn(&str) -> bool,
) -> Vec<ToolScore> {
    let mut scores: Vec<ToolScore> = weights
        .iter()
        .map(|(tool, base)| {
            let fired: Vec<&BoostRule> = rules
                .iter()
                .filter(|r| r.tool == tool && r.when.holds(features))
                .collect();
            ToolScore {
                tool: tool.clone(),
                base: *base,
                boost: fired.iter().map(|r| r.boost).sum(),
                rules: fired.iter().map(|r| r.name).collect(),
                admissible: admissible(tool),
            }
        })
        .collect();
    scores.sort_by(rank);
    scores
}
