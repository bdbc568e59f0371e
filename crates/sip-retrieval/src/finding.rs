//! Findings: atomic observations produced by synthesis

use crate::category::Category;
use serde::{Deserialize, Serialize};

/// Consolidated document meaning no branch produced evidence
pub const INSUFFICIENT_EVIDENCE: &str =
    "There was insufficient evidence to form a preliminary finding.";

/// One observation to be checked against the framework
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_category: Option<Category>,
}

impl Finding {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            inferred_category: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.inferred_category = Some(category);
        self
    }

    /// The carried category, or one inferred from the text.
    #[must_use]
    pub fn category(&self) -> Category {
        self.inferred_category
            .unwrap_or_else(|| Category::classify(&self.text))
    }

    /// Split a consolidated document into findings.
    ///
    /// One finding per list item or non-empty line. Markdown headings and
    /// horizontal rules are dropped, and list markers are stripped. The
    /// [`INSUFFICIENT_EVIDENCE`] marker yields no findings.
    #[must_use]
    pub fn parse_document(document: &str) -> Vec<Self> {
        if document.trim() == INSUFFICIENT_EVIDENCE {
            return Vec::new();
        }
        document
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !is_rule(line))
            .map(strip_marker)
            .filter(|text| !text.is_empty())
            .map(|text| {
                let category = Category::classify(text);
                Self::new(text).with_category(category)
            })
            .collect()
    }
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| matches!(c, '-' | '*' | '_'))
}

fn strip_marker(line: &str) -> &str {
    for bullet in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim();
        }
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bullets_numbers_and_lines() {
        let doc = "# Summary\n\n- Lessons are well planned.\n2. Attendance is high.\n3) Parents are engaged.\nPlain observation.\n---\n";
        let texts: Vec<String> = Finding::parse_document(doc).into_iter().map(|f| f.text).collect();
        assert_eq!(
            texts,
            vec![
                "Lessons are well planned.",
                "Attendance is high.",
                "Parents are engaged.",
                "Plain observation.",
            ]
        );
    }

    #[test]
    fn parsed_findings_carry_a_category() {
        let findings = Finding::parse_document("* Attendance is 98%");
        assert_eq!(findings[0].inferred_category, Some(Category::PersonalDevelopment));
    }

    #[test]
    fn blank_document_has_no_findings() {
        assert!(Finding::parse_document("  \n\n").is_empty());
    }

    #[test]
    fn insufficient_evidence_marker_has_no_findings() {
        assert!(Finding::parse_document(INSUFFICIENT_EVIDENCE).is_empty());
        assert!(Finding::parse_document(&format!("\n  {INSUFFICIENT_EVIDENCE}  \n")).is_empty());
        // the sentence inside a longer document is an ordinary line
        let doc = format!("- Attendance is high.\n{INSUFFICIENT_EVIDENCE}");
        assert_eq!(Finding::parse_document(&doc).len(), 2);
    }

    #[test]
    fn numbers_without_marker_are_kept() {
        let findings = Finding::parse_document("2024 results improved");
        assert_eq!(findings[0].text, "2024 results improved");
    }
}
