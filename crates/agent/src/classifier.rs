//! Decides whether a request is compound enough to plan first.
//!
//! Scoring (deterministic, no model call):
//!
//! | Signal | Points |
//! |--------|--------|
//! | Distinct action verbs (research, create, compare, ...) | 1 each, max 3 |
//! | Conjunctions joining steps (and, then, also, ...) | 1 each, max 2 |
//! | Distinct deliverables (report, summary, examples, ...) | 1 each, max 2 |
//! | Thoroughness words (detailed, comprehensive, ...) | 1 |
//! | Length over 40 / 80 words | 1 / 2 |
//!
//! A request needs planning at [`PLANNING_THRESHOLD`] points or more,
//! provided it has at least [`MIN_WORDS`] words.

use serde::Serialize;

pub const PLANNING_THRESHOLD: u32 = 3;
pub const MIN_WORDS: usize = 6;

const ACTION_VERBS: &[&str] = &[
    "research", "create", "write", "build", "analyze", "analyse", "compare", "summarize",
    "summarise", "design", "implement", "develop", "investigate", "draft", "review", "generate",
    "compile", "evaluate", "gather", "collect", "prepare", "produce", "document", "outline",
    "refactor", "deploy", "test", "migrate", "plan", "explain",
];

const CONJUNCTIONS: &[&str] = &["and", "then", "also", "plus", "afterwards", "finally"];

const CONJUNCTION_PHRASES: &[&str] = &["as well as", "after that", "followed by", "along with"];

const DELIVERABLES: &[&str] = &[
    "report", "summary", "document", "documentation", "presentation", "example", "table",
    "chart", "list", "guide", "tutorial", "article", "script", "diagram", "outline", "email",
    "spreadsheet", "test", "plan", "proposal", "overview", "comparison", "analysis",
];

const THOROUGHNESS: &[&str] = &["detailed", "comprehensive", "thorough", "in-depth", "step-by-step", "complete"];

/// Breakdown of a classification, mostly useful for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Complexity {
    pub words: usize,
    pub score: u32,
    pub verbs: Vec<String>,
    pub deliverables: Vec<String>,
    pub requires_planning: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn requires_planning(&self, prompt: &str) -> bool {
        self.assess(prompt).requires_planning
    }

    pub fn assess(&self, prompt: &str) -> Complexity {
        let lower = prompt.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();

        // A word that is both (e.g. "document", "plan") counts once, as a verb
        // when it leads the clause and as a deliverable otherwise.
        let mut verbs: Vec<String> = Vec::new();
        let mut deliverables: Vec<String> = Vec::new();
        for (idx, word) in words.iter().enumerate() {
            let stem = singular(word);
            let leads = idx == 0 || words[idx - 1] == "and" || words[idx - 1] == "then" || words[idx - 1] == "to";
            if ACTION_VERBS.contains(word) && (leads || !DELIVERABLES.contains(&stem)) {
                push_unique(&mut verbs, word);
            } else if DELIVERABLES.contains(&stem) {
                push_unique(&mut deliverables, stem);
            }
        }

        let conjunctions = words.iter().filter(|w| CONJUNCTIONS.contains(w)).count()
            + CONJUNCTION_PHRASES
                .iter()
                .map(|p| lower.matches(p).count())
                .sum::<usize>();
        let thorough = words.iter().any(|w| THOROUGHNESS.contains(w));
        let length_bonus = match words.len() {
            n if n > 80 => 2,
            n if n > 40 => 1,
            _ => 0,
        };

        let score = verbs.len().min(3) as u32
            + conjunctions.min(2) as u32
            + deliverables.len().min(2) as u32
            + u32::from(thorough)
            + length_bonus;

        Complexity {
            words: words.len(),
            score,
            verbs,
            deliverables,
            requires_planning: words.len() >= MIN_WORDS && score >= PLANNING_THRESHOLD,
        }
    }
}

fn singular(word: &str) -> &str {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}

fn push_unique(list: &mut Vec<String>, word: &str) {
    if !list.iter().any(|w| w == word) {
        list.push(word.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn needs_plan(prompt: &str) -> bool {
        ComplexityClassifier::new().requires_planning(prompt)
    }

    #[test]
    fn greeting_is_simple() {
        assert!(!needs_plan("Hello"));
        assert!(!needs_plan(""));
    }

    #[test]
    fn factual_questions_are_simple() {
        assert!(!needs_plan("What is the capital of France?"));
        assert!(!needs_plan("How many bytes are in a kilobyte?"));
        assert!(!needs_plan("Write a haiku"));
    }

    #[test]
    fn compound_research_request_needs_plan() {
        let prompt = "Research the latest X and create a detailed summary document with examples";
        let c = ComplexityClassifier::new().assess(prompt);
        assert!(c.requires_planning, "{c:?}");
        assert_eq!(c.verbs, vec!["research", "create"]);
        assert_eq!(c.deliverables, vec!["summary", "document", "example"]);
    }

    #[test]
    fn multi_step_instructions_need_plan() {
        assert!(needs_plan(
            "Compare the three databases, then write a report and a migration script"
        ));
        assert!(needs_plan(
            "Analyze last quarter's sales data as well as the churn numbers and prepare a presentation"
        ));
    }

    #[test]
    fn deterministic() {
        let prompt = "Investigate the outage, draft an email to customers and review the runbook";
        let c = ComplexityClassifier::new();
        assert_eq!(c.assess(prompt), c.assess(prompt));
    }

    #[test]
    fn long_prompts_get_a_bonus() {
        let filler = "word ".repeat(85);
        let c = ComplexityClassifier::new().assess(&format!("Please explain {filler}"));
        assert_eq!(c.score, 1 + 2);
        assert!(c.requires_planning);
    }
}
