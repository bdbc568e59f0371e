//! Evaluation rubric categories
//!
//! The six performance standards of the UAE school inspection framework.
//! Findings are classified by keyword overlap; text that matches nothing is
//! treated as a teaching observation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A performance standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    StudentsAchievement,
    PersonalDevelopment,
    TeachingAndAssessment,
    Curriculum,
    ProtectionCareGuidance,
    LeadershipAndManagement,
}

impl Category {
    /// All categories in framework order
    pub const ALL: [Self; 6] = [
        Self::StudentsAchievement,
        Self::PersonalDevelopment,
        Self::TeachingAndAssessment,
        Self::Curriculum,
        Self::ProtectionCareGuidance,
        Self::LeadershipAndManagement,
    ];

    /// Fallback for findings with no keyword match
    pub const DEFAULT: Self = Self::TeachingAndAssessment;

    /// Standard number in the framework (1-based)
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::StudentsAchievement => 1,
            Self::PersonalDevelopment => 2,
            Self::TeachingAndAssessment => 3,
            Self::Curriculum => 4,
            Self::ProtectionCareGuidance => 5,
            Self::LeadershipAndManagement => 6,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StudentsAchievement => "Students' achievement",
            Self::PersonalDevelopment => {
                "Students' personal and social development, and their innovation skills"
            }
            Self::TeachingAndAssessment => "Teaching and assessment",
            Self::Curriculum => "Curriculum",
            Self::ProtectionCareGuidance => "The protection, care, guidance and support of students",
            Self::LeadershipAndManagement => "Leadership and management",
        }
    }

    /// Word prefixes that indicate this category
    #[must_use]
    pub const fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::StudentsAchievement => &[
                "achievement",
                "attainment",
                "progress",
                "outcome",
                "exam",
                "test score",
                "reading",
                "mathematic",
                "literacy",
                "numeracy",
                "learning skill",
            ],
            Self::PersonalDevelopment => &[
                "behaviour",
                "behavior",
                "attitude",
                "attendance",
                "punctual",
                "islamic value",
                "emirati",
                "heritage",
                "innovation",
                "enterprise",
                "social responsib",
                "volunteer",
                "personal development",
            ],
            Self::TeachingAndAssessment => &[
                "teach",
                "lesson",
                "assessment",
                "questioning",
                "feedback",
                "differentiat",
                "pedagog",
                "classroom",
                "instruction",
                "marking",
            ],
            Self::Curriculum => &[
                "curricul",
                "syllabus",
                "scheme of work",
                "extracurricular",
                "enrichment",
                "subject choice",
                "cross curricular",
                "course",
            ],
            Self::ProtectionCareGuidance => &[
                "safeguard",
                "safety",
                "child protection",
                "bully",
                "welfare",
                "wellbeing",
                "well being",
                "health",
                "guidance",
                "counsel",
                "special educational",
                "inclusion",
                "inclusive",
                "pastoral",
            ],
            Self::LeadershipAndManagement => &[
                "leader",
                "management",
                "governance",
                "governing",
                "principal",
                "self evaluation",
                "improvement plan",
                "staffing",
                "parent",
                "partnership",
                "budget",
            ],
        }
    }

    /// Infer the category of `text`.
    ///
    /// The category with the most keyword hits wins; ties go to the lower
    /// ordinal, and no hits at all yields [`Category::DEFAULT`].
    #[must_use]
    pub fn classify(text: &str) -> Self {
        let normalized = normalize(text);
        let mut best = (0usize, Self::DEFAULT);
        for category in Self::ALL {
            let hits = category
                .keywords()
                .iter()
                .filter(|kw| normalized.contains(&format!(" {kw}")))
                .count();
            if hits > best.0 {
                best = (hits, category);
            }
        }
        best.1
    }

    /// Distance between two standards in framework order
    #[must_use]
    pub fn distance(self, other: Self) -> u8 {
        self.ordinal().abs_diff(other.ordinal())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lowercase, punctuation folded to single spaces, with a leading space so
/// keyword prefixes can be matched at word starts.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out
}
