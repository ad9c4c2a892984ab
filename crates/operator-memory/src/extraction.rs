//! Deterministic extraction from conversation turns.
//!
//! Two things are learned without a model call: domain concepts mentioned by
//! the user (semantic memory) and the order in which the assistant calls
//! tools (procedural memory, once the same order repeats).

use operator_core::ToolCall;

use crate::procedural::{ProcedureInput, ProcedureStep};
use crate::semantic::ConceptInput;

/// Episodic event type under which tool sequences are logged.
pub const TOOL_SEQUENCE_EVENT: &str = "tool_sequence";

/// A domain concept and the words that mention it.
#[derive(Debug)]
pub struct ConceptRule {
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub keywords: &'static [&'static str],
}

pub const DOMAIN_CONCEPTS: &[ConceptRule] = &[
    ConceptRule {
        name: "student",
        category: "people",
        description: "Children enrolled at the kindergarten",
        keywords: &["学生", "幼儿", "孩子", "student", "child", "children", "kid"],
    },
    ConceptRule {
        name: "class",
        category: "organization",
        description: "A class group of children with its teachers",
        keywords: &["班级", "班", "class"],
    },
    ConceptRule {
        name: "teacher",
        category: "people",
        description: "Teaching staff",
        keywords: &["教师", "老师", "teacher"],
    },
    ConceptRule {
        name: "parent",
        category: "people",
        description: "Parents and guardians of enrolled children",
        keywords: &["家长", "parent", "guardian"],
    },
    ConceptRule {
        name: "attendance",
        category: "operations",
        description: "Daily check-in and absence records",
        keywords: &["考勤", "出勤", "签到", "缺勤", "attendance", "absent", "absence"],
    },
    ConceptRule {
        name: "enrollment",
        category: "operations",
        description: "Admissions, applications and enrollment planning",
        keywords: &["招生", "报名", "入园", "enrollment", "enrolment", "admission"],
    },
    ConceptRule {
        name: "activity",
        category: "operations",
        description: "Events and activities organised for children and families",
        keywords: &["活动", "activity", "activities", "event"],
    },
    ConceptRule {
        name: "course",
        category: "teaching",
        description: "Courses and curriculum content",
        keywords: &["课程", "教案", "course", "curriculum", "lesson"],
    },
    ConceptRule {
        name: "tuition",
        category: "finance",
        description: "Fees, payments and billing",
        keywords: &["学费", "缴费", "收费", "tuition", "fee", "payment"],
    },
    ConceptRule {
        name: "health",
        category: "care",
        description: "Health checks, meals and wellbeing",
        keywords: &["健康", "体检", "营养", "health", "medical", "meal"],
    },
];

/// Concepts mentioned in `text`, in table order.
pub fn extract_concepts(text: &str) -> Vec<&'static ConceptRule> {
    let lower = text.to_lowercase();
    DOMAIN_CONCEPTS
        .iter()
        .filter(|rule| rule.keywords.iter().any(|k| mentions(&lower, k)))
        .collect()
}

impl ConceptRule {
    pub fn to_input(&self, mention: &str) -> ConceptInput {
        ConceptInput {
            name: self.name.to_string(),
            description: self.description.to_string(),
            category: self.category.to_string(),
            metadata: serde_json::json!({
                "extraction": "keyword",
                "first_mention": mention,
            }),
        }
    }
}

/// ASCII keywords must start a word; CJK keywords match anywhere.
fn mentions(lower: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return lower.contains(keyword);
    }
    lower.match_indices(keyword).any(|(idx, _)| {
        lower[..idx]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric())
    })
}

/// Key identifying an ordered tool sequence, e.g. `any_query -> render_component`.
pub fn tool_pattern(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|c| c.tool_name.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Procedure describing a tool sequence seen `seen` times.
pub fn tool_procedure(calls: &[ToolCall], seen: usize) -> ProcedureInput {
    let steps = calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let mut step = ProcedureStep::new(i as u32 + 1, format!("call {}", call.tool_name));
            step.actions.push(call.arguments.to_string());
            step
        })
        .collect();
    ProcedureInput {
        name: tool_pattern(calls),
        description: format!("Tool sequence observed {seen} times"),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("c-{name}"),
            tool_name: name.into(),
            arguments: serde_json::json!({"q": name}),
        }
    }

    #[test]
    fn test_extracts_chinese_and_english_mentions() {
        let names: Vec<&str> = extract_concepts("查询大一班的考勤情况").iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["class", "attendance"]);

        let names: Vec<&str> = extract_concepts("Which Teachers have a class today?")
            .iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["class", "teacher"]);
    }

    #[test]
    fn test_ascii_keywords_start_a_word() {
        assert!(extract_concepts("prevent errors").is_empty());
        assert!(extract_concepts("hello there").is_empty());
    }

    #[test]
    fn test_tool_procedure_keeps_call_order() {
        let calls = [call("any_query"), call("render_component")];
        assert_eq!(tool_pattern(&calls), "any_query -> render_component");
        let procedure = tool_procedure(&calls, 2);
        assert_eq!(procedure.name, "any_query -> render_component");
        assert_eq!(procedure.steps.len(), 2);
        assert_eq!(procedure.steps[1].step_number, 2);
        assert_eq!(procedure.steps[1].description, "call render_component");
        assert!(procedure.steps[0].actions[0].contains("any_query"));
    }
}
