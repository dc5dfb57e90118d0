//! Cleanup of generated text.

use regex_lite::Regex;

struct Rules {
    heading: Regex,
    bold_labels: Vec<(Regex, &'static str)>,
    bold: Regex,
    spacing: Vec<Regex>,
    item: Regex,
}

fn rules() -> Option<&'static Rules> {
    static RULES: std::sync::OnceLock<Option<Rules>> = std::sync::OnceLock::new();
    RULES
        .get_or_init(|| {
            let label = |name: &'static str| -> Option<(Regex, &'static str)> {
                Some((Regex::new(&format!(r"\*\*{name}:\*\*")).ok()?, name))
            };
            let spaced = |marker: &str| Regex::new(&format!(r"([^\n])\n({marker})")).ok();
            Some(Rules {
                heading: Regex::new(r"#{1,6}\s+Q(\d+):").ok()?,
                bold_labels: vec![label("Answer")?, label("Explanation")?, label("Example")?],
                bold: Regex::new(r"\*\*(.+?)\*\*").ok()?,
                spacing: vec![spaced("Explanation:")?, spaced("Example:")?, spaced("---")?],
                item: Regex::new(r"(?m)^\s*Q\d+:").ok()?,
            })
        })
        .as_ref()
}

/// Strip heading and bold markers and put a blank line before each section.
///
/// `### Q3:` becomes `Q3:`, `**Answer:**` becomes `Answer:`, any other
/// `**bold**` loses its markers, and `Explanation:`, `Example:` and `---`
/// are separated from the preceding line by an empty line.
pub fn clean_markup(text: &str) -> String {
    let Some(rules) = rules() else {
        return text.trim().to_string();
    };

    let mut out = rules.heading.replace_all(text, "Q$1:").into_owned();
    for (pattern, name) in &rules.bold_labels {
        out = pattern.replace_all(&out, format!("{name}:")).into_owned();
    }
    out = rules.bold.replace_all(&out, "$1").into_owned();
    for pattern in &rules.spacing {
        out = pattern.replace_all(&out, "$1\n\n$2").into_owned();
    }
    out.trim().to_string()
}

/// Number of question items, counted by lines starting with `Q<n>:`.
pub fn count_items(text: &str) -> u32 {
    rules()
        .map(|rules| rules.item.find_iter(text).count() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markers() {
        let raw = "### Q1: What is ATP?\n**Answer:** Energy **currency**\nExplanation: Stores energy";
        let cleaned = clean_markup(raw);
        assert_eq!(
            cleaned,
            "Q1: What is ATP?\nAnswer: Energy currency\n\nExplanation: Stores energy"
        );
    }

    #[test]
    fn test_spacing_is_idempotent() {
        let once = clean_markup("Q1: a\nAnswer: b\nExample: c\n---\nQ2: d");
        assert_eq!(clean_markup(&once), once);
        assert!(once.contains("b\n\nExample: c\n\n---"));
    }

    #[test]
    fn test_count_items() {
        let text = "Q1: one\nAnswer: a\n\nQ2: two\nAnswer: b\n  Q3: three\nnot Q4: inline";
        assert_eq!(count_items(text), 3);
        assert_eq!(count_items("no questions here"), 0);
    }

    #[test]
    fn test_count_after_cleanup() {
        let raw = "## Q1: first\n**Answer:** x\n## Q2: second\n**Answer:** y";
        assert_eq!(count_items(&clean_markup(raw)), 2);
    }
}
