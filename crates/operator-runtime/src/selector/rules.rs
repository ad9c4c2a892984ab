//! Declarative query-feature rules.
//!
//! Each [`KeywordRule`] maps one [`Feature`] to the Chinese and English
//! phrases that signal it. Extraction is independent of scoring so the table
//! can be tested on its own.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// A lexical feature of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Conditions: "大于", "where", "older than".
    Filter,
    /// Ordering: "排序", "sorted", "top".
    Sort,
    /// Statistics: "统计", "how many", "average".
    Aggregate,
    /// Several related entities: "关联", "together with".
    Join,
    /// Explicit page navigation: "导航到", "go to".
    Navigation,
    /// Explicit visual output: "显示", "chart".
    Render,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Filter => "filter",
            Feature::Sort => "sort",
            Feature::Aggregate => "aggregate",
            Feature::Join => "join",
            Feature::Navigation => "navigation",
            Feature::Render => "render",
        }
    }

    /// Features that need the general-purpose query tool.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Feature::Filter | Feature::Sort | Feature::Aggregate | Feature::Join
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the feature table.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    pub feature: Feature,
    pub keywords: &'static [&'static str],
}

/// The feature table. ASCII keywords match whole words; CJK keywords match
/// as substrings since Chinese text has no word separators.
pub const FEATURE_RULES: &[KeywordRule] = &[
    KeywordRule {
        feature: Feature::Navigation,
        keywords: &[
            "导航到", "导航", "跳转", "打开", "进入", "前往", "去到", "访问",
            "go to", "open", "navigate", "take me to", "enter",
        ],
    },
    KeywordRule {
        feature: Feature::Render,
        keywords: &[
            "显示", "展示", "图表", "表格", "可视化", "柱状图", "折线图", "饼图", "趋势图", "画",
            "show", "display", "chart", "table", "graph", "plot", "render", "visualize",
        ],
    },
    KeywordRule {
        feature: Feature::Sort,
        keywords: &[
            "排序", "排名", "最高", "最低", "最多", "最少", "前十", "前三", "前五", "倒序",
            "sort", "sorted", "order by", "rank", "ranked", "top", "highest", "lowest",
        ],
    },
    KeywordRule {
        feature: Feature::Filter,
        keywords: &[
            "筛选", "过滤", "条件", "大于", "小于", "超过", "低于", "等于", "之间", "以上", "以下",
            "只看", "未缴费", "where", "whose", "filter", "greater than", "less than",
            "more than", "between", "older than", "younger than", "only",
        ],
    },
    KeywordRule {
        feature: Feature::Aggregate,
        keywords: &[
            "统计", "总数", "人数", "多少", "平均", "合计", "汇总", "占比", "比例", "数量",
            "count", "counts", "how many", "total", "sum", "average", "avg", "statistics",
            "ratio", "percentage",
        ],
    },
    KeywordRule {
        feature: Feature::Join,
        keywords: &[
            "关联", "对应的", "及其", "以及他们的", "join", "together with", "along with",
            "and their",
        ],
    },
];

/// The set of features found in one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSet {
    features: BTreeSet<Feature>,
    /// Matched keywords, for diagnostics.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<(Feature, &'static str)>,
}

impl FeatureSet {
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn has_data(&self) -> bool {
        self.features.iter().any(Feature::is_data)
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }

    pub fn insert(&mut self, feature: Feature) {
        self.features.insert(feature);
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.features.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<&str> = self.features.iter().map(Feature::as_str).collect();
        f.write_str(&names.join(", "))
    }
}

/// Whether `keyword` occurs in `haystack` (already lowercased).
pub fn keyword_matches(haystack: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return haystack.contains(keyword);
    }
    haystack.match_indices(keyword).any(|(start, m)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + m.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Run the rule table over a query.
pub fn extract_features(query: &str) -> FeatureSet {
    extract_with(FEATURE_RULES, query)
}

pub fn extract_with(rules: &[KeywordRule], query: &str) -> FeatureSet {
    let lower = query.to_lowercase();
    let mut set = FeatureSet::default();
    for rule in rules {
        if let Some(keyword) = rule.keywords.iter().find(|k| keyword_matches(&lower, k)) {
            set.insert(rule.feature);
            set.matched.push((rule.feature, *keyword));
        }
    }
    set
}
