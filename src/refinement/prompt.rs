//! Prompt construction.
//!
//! A prompt is the difficulty template, an optional table hint derived from
//! the raw text, the fixed item layout and finally the topic itself.

use std::collections::BTreeMap;

use regex_lite::Regex;
use serde::Serialize;

use crate::canonical::canonical_hash_hex;
use crate::types::{DifficultyLevel, Provider};

/// Bumped whenever the templates change, so fingerprints change with them.
pub const PROMPT_VERSION: &str = "study_prompt_v1";

const ITEM_LAYOUT: &str = "\
Write every item in exactly this layout, numbering questions from Q1:

Q1: <question>
Answer: <answer>

Explanation: <explanation>

Example: <example>

---

Do not use markdown headings, bold text or bullet lists.";

const ATTRIBUTE_KEYWORDS: [&str; 10] = [
    "caused by",
    "transmitted",
    "treated",
    "prevented",
    "symptoms",
    "example",
    "definition",
    "formula",
    "purpose",
    "function",
];

fn difficulty_instructions(difficulty: DifficultyLevel) -> &'static str {
    match difficulty {
        DifficultyLevel::Easy => "\
Produce EASY study flashcards aimed at quick recognition of key terms.
Write 10-15 questions. Keep every Answer to 4-6 words, every Explanation
to 6-8 words and every Example to 5-7 words.",
        DifficultyLevel::Medium => "\
Produce MEDIUM study questions that check understanding of the material.
Write 15-20 questions that together cover every important point. Answers
are one sentence; Explanations say why in one or two sentences; Examples
are concrete.",
        DifficultyLevel::Difficult => "\
Produce DIFFICULT study questions that test mastery: mechanisms, causes,
comparisons and application to new cases. Write 15-20 questions covering
all important material. Answers are precise; Explanations reason step by
step; Examples apply the idea to a realistic scenario.",
    }
}

fn provider_preamble(provider: Provider) -> &'static str {
    match provider {
        Provider::Gemini => "You are an experienced tutor writing a study guide.",
        Provider::Groq => {
            "You are an experienced tutor writing a study guide. Reply with the items only, no introduction or closing remarks."
        }
    }
}

/// A rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Target provider.
    pub provider: Provider,
    /// Target difficulty.
    pub difficulty: DifficultyLevel,
    /// Full prompt text.
    pub text: String,
    /// Table hint included in the prompt, if any.
    pub table_hint: Option<TableHint>,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    version: &'a str,
    provider: Provider,
    difficulty: DifficultyLevel,
    text: &'a str,
}

impl Prompt {
    /// Render the prompt for a topic.
    pub fn build(provider: Provider, difficulty: DifficultyLevel, title: &str, raw_text: &str) -> Self {
        let table_hint = detect_table_candidates(raw_text);

        let mut text = String::with_capacity(raw_text.len() + 1024);
        text.push_str(provider_preamble(provider));
        text.push_str("\n\n");
        text.push_str(difficulty_instructions(difficulty));
        text.push_str("\n\n");
        if let Some(hint) = &table_hint {
            text.push_str(&hint.instructions());
            text.push_str("\n\n");
        }
        text.push_str(ITEM_LAYOUT);
        text.push_str("\n\nTopic: ");
        text.push_str(title.trim());
        text.push_str("\n\nStudy notes:\n");
        text.push_str(raw_text.trim());
        text.push('\n');

        Self {
            provider,
            difficulty,
            text,
            table_hint,
        }
    }

    /// xxh64 fingerprint over the canonical form of the prompt.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        canonical_hash_hex(&FingerprintInput {
            version: PROMPT_VERSION,
            provider: self.provider,
            difficulty: self.difficulty,
            text: &self.text,
        })
    }
}

/// Structured content found in the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHint {
    /// Distinct descriptions of what was found, in detection order.
    pub topics: Vec<String>,
}

/// Maximum number of detected topics named in the instructions.
const MAX_HINT_TOPICS: usize = 3;

impl TableHint {
    /// One-line suggestion naming what was found.
    pub fn suggestion(&self) -> String {
        match self.topics.as_slice() {
            [only] => format!(
                "This content contains {only}. Present it as a table with NO Explanation or Example fields."
            ),
            topics if topics.len() <= MAX_HINT_TOPICS => format!(
                "This content contains: {}. Present these as tables with NO Explanation or Example fields.",
                topics.join(", ")
            ),
            _ => "This content has multiple categorized sections. Present each category as its own table."
                .to_string(),
        }
    }

    /// Instruction block appended to the prompt.
    pub fn instructions(&self) -> String {
        let keywords: Vec<&str> = self
            .topics
            .iter()
            .take(MAX_HINT_TOPICS)
            .map(String::as_str)
            .collect();
        format!(
            "TABLE HINT: {}\n\
             Table rules: use a table only for 3-10 items of the same kind ({}). \
             A table answer has no Explanation or Example. Never exceed 10 rows; \
             split larger sets into several questions.",
            self.suggestion(),
            keywords.join("; ")
        )
    }
}

struct Patterns {
    category: Regex,
    comparison: Regex,
    structured_line: Regex,
    properties: Regex,
    enumerated: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: std::sync::OnceLock<Option<Patterns>> = std::sync::OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                category: Regex::new(
                    r"(?i)\b(types|kinds|categories|classification|branches|divisions|classes|forms|stages|phases|levels)\s+of\s+(\w+)",
                )
                .ok()?,
                comparison: Regex::new(r"(?i)\b(vs\.?|versus|differences?\s+between|compared?|comparison)\b").ok()?,
                structured_line: Regex::new(r"^\w[\w ]*:").ok()?,
                properties: Regex::new(r"(?i)\b(properties|characteristics|features|attributes)\s+of\s+(\w+)").ok()?,
                enumerated: Regex::new(r"(?m)^\s*(\d+[.)]|[-*•])\s+\S").ok()?,
            })
        })
        .as_ref()
}

/// Look for content that reads better as a table.
///
/// Signals, in order: category phrases ("types of X"), at least two
/// comparisons, at least three `Label:` lines, a "properties of X" phrase
/// backed by four or more enumerated items, and at least two attribute
/// keywords that each recur three or more times.
pub fn detect_table_candidates(raw_text: &str) -> Option<TableHint> {
    let patterns = patterns()?;
    let mut found: BTreeMap<String, usize> = BTreeMap::new();
    let mut push = |topic: String| {
        let next = found.len();
        found.entry(topic).or_insert(next);
    };

    for caps in patterns.category.captures_iter(raw_text) {
        push(format!("{} of {}", caps[1].to_lowercase(), caps[2].to_lowercase()));
    }

    if patterns.comparison.find_iter(raw_text).count() >= 2 {
        push("comparisons".to_string());
    }

    let structured = raw_text
        .lines()
        .map(str::trim)
        .filter(|line| line.len() < 200 && patterns.structured_line.is_match(line))
        .count();
    if structured >= 3 {
        push("structured list".to_string());
    }

    if patterns.enumerated.find_iter(raw_text).count() >= 4 {
        for caps in patterns.properties.captures_iter(raw_text) {
            push(format!("{} of {} table", caps[1].to_lowercase(), caps[2].to_lowercase()));
        }
    }

    let lowered = raw_text.to_lowercase();
    let recurring = ATTRIBUTE_KEYWORDS
        .iter()
        .filter(|kw| lowered.matches(*kw).count() >= 3)
        .count();
    if recurring >= 2 {
        push("attribute matrix".to_string());
    }

    if found.is_empty() {
        return None;
    }
    let mut ordered: Vec<(String, usize)> = found.into_iter().collect();
    ordered.sort_by_key(|(_, position)| *position);
    Some(TableHint {
        topics: ordered.into_iter().map(|(topic, _)| topic).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_topic_and_layout() {
        let prompt = Prompt::build(
            Provider::Gemini,
            DifficultyLevel::Medium,
            "Cell Structure",
            "The cell membrane surrounds the cytoplasm.",
        );
        assert!(prompt.text.contains("Topic: Cell Structure"));
        assert!(prompt.text.contains("Q1: <question>"));
        assert!(prompt.text.contains("15-20 questions"));
        assert!(prompt.table_hint.is_none());
    }

    #[test]
    fn test_easy_prompt_word_limits() {
        let prompt = Prompt::build(Provider::Groq, DifficultyLevel::Easy, "T", "text");
        assert!(prompt.text.contains("4-6 words"));
        assert!(prompt.text.contains("items only"));
    }

    #[test]
    fn test_fingerprint_varies_by_provider() {
        let a = Prompt::build(Provider::Gemini, DifficultyLevel::Easy, "T", "text");
        let b = Prompt::build(Provider::Groq, DifficultyLevel::Easy, "T", "text");
        let again = Prompt::build(Provider::Gemini, DifficultyLevel::Easy, "T", "text");
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap(), again.fingerprint().unwrap());
    }

    #[test]
    fn test_detects_category_phrase() {
        let hint = detect_table_candidates("There are four Types of Tissue in the body.").unwrap();
        assert_eq!(hint.topics, vec!["types of tissue".to_string()]);
        assert!(hint.suggestion().contains("types of tissue"));
        assert!(hint.suggestion().contains("NO Explanation"));
    }

    #[test]
    fn test_detects_structured_list() {
        let text = "Mitochondria: energy\nRibosome: protein synthesis\nNucleus: DNA storage\n";
        let hint = detect_table_candidates(text).unwrap();
        assert!(hint.topics.contains(&"structured list".to_string()));
    }

    #[test]
    fn test_single_comparison_is_not_enough() {
        assert!(detect_table_candidates("Mitosis versus meiosis.").is_none());
        let hint = detect_table_candidates("Mitosis versus meiosis. DNA vs RNA.").unwrap();
        assert_eq!(hint.topics, vec!["comparisons".to_string()]);
    }

    #[test]
    fn test_attribute_matrix() {
        let text = "Malaria symptoms fever. Flu symptoms cough. Cold symptoms sneeze. \
                    Malaria treated with drugs. Flu treated with rest. Cold treated with tea.";
        let hint = detect_table_candidates(text).unwrap();
        assert!(hint.topics.contains(&"attribute matrix".to_string()));
    }

    #[test]
    fn test_many_topics_suggest_sections() {
        let text = "types of cells, kinds of tissue, stages of growth, phases of mitosis";
        let hint = detect_table_candidates(text).unwrap();
        assert_eq!(hint.topics.len(), 4);
        assert!(hint.suggestion().contains("multiple categorized sections"));
        assert!(!hint.instructions().contains("phases of mitosis"));
    }

    #[test]
    fn test_table_hint_is_included_in_prompt() {
        let prompt = Prompt::build(
            Provider::Gemini,
            DifficultyLevel::Difficult,
            "Tissues",
            "The main types of tissue are epithelial and connective.",
        );
        assert!(prompt.text.contains("TABLE HINT"));
    }
}
