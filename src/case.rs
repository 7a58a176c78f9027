//! Test case declarations

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ParityError, Result};
use crate::variant::ProgramVariant;

/// What a case asserts about its variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// All variants succeed and produce identical stdout
    #[default]
    Equivalence,
    /// Every variant exits successfully; outputs are not compared
    Smoke,
}

impl CheckKind {
    /// Fewest variants a case of this kind may declare.
    pub fn min_variants(&self) -> usize {
        match self {
            Self::Equivalence => 2,
            Self::Smoke => 1,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equivalence => write!(f, "equivalence"),
            Self::Smoke => write!(f, "smoke"),
        }
    }
}

/// One logical test: a model, an argument set, an optional auxiliary
/// artifact and the variants that must agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub sample: String,
    pub model: String,
    /// Free-form sample arguments, one argv token each
    pub args: Vec<String>,
    pub artifact: Option<String>,
    pub kind: CheckKind,
    pub variants: Vec<ProgramVariant>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl TestCase {
    /// Reject cases that cannot prove anything.
    pub fn validate(&self) -> Result<()> {
        let min = self.kind.min_variants();
        if self.variants.len() < min {
            return Err(ParityError::invalid_case(
                &self.id,
                format!(
                    "{} check needs at least {min} variant(s), got {}",
                    self.kind,
                    self.variants.len()
                ),
            ));
        }
        for (i, variant) in self.variants.iter().enumerate() {
            if self.variants[..i].iter().any(|v| v.name == variant.name) {
                return Err(ParityError::invalid_case(
                    &self.id,
                    format!("variant '{}' declared twice", variant.name),
                ));
            }
        }
        if self.model.is_empty() {
            return Err(ParityError::invalid_case(&self.id, "model name is empty"));
        }
        Ok(())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn variant_names(&self) -> Vec<&str> {
        self.variants.iter().map(|v| v.name.as_str()).collect()
    }
}

/// Filter applied to a case table before running it
#[derive(Debug, Clone, Default)]
pub struct CaseSelector {
    /// Substring that must appear in the case id
    pub filter: Option<String>,
    /// Tags that must all be present
    pub tags: Vec<String>,
}

impl CaseSelector {
    pub fn matches(&self, case: &TestCase) -> bool {
        let id_matches = self.filter.as_deref().is_none_or(|filter| case.id.contains(filter));
        id_matches && self.tags.iter().all(|tag| case.has_tag(tag))
    }

    pub fn select(&self, cases: Vec<TestCase>) -> Vec<TestCase> {
        cases.into_iter().filter(|case| self.matches(case)).collect()
    }
}
