//! Output comparison across variants
//!
//! Outputs are compared byte-for-byte after an explicitly configured
//! [`Normalization`]. The default is [`Normalization::Exact`]: nothing is
//! trimmed unless the caller opts in.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Divergence, ParityError, Result};
use crate::runner::ExecutionResult;

/// Declared normalization applied to stdout before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Byte-exact comparison
    #[default]
    Exact,
    /// Strip exactly one trailing `\n` or `\r\n`
    TrailingNewline,
    /// Strip all trailing ASCII whitespace
    TrailingWhitespace,
}

impl Normalization {
    /// Apply this rule to a captured output.
    pub fn apply<'a>(&self, output: &'a [u8]) -> &'a [u8] {
        match self {
            Self::Exact => output,
            Self::TrailingNewline => output
                .strip_suffix(b"\r\n")
                .or_else(|| output.strip_suffix(b"\n"))
                .unwrap_or(output),
            Self::TrailingWhitespace => {
                let end = output
                    .iter()
                    .rposition(|b| !b.is_ascii_whitespace())
                    .map_or(0, |pos| pos + 1);
                &output[..end]
            }
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::TrailingNewline => write!(f, "trailing-newline"),
            Self::TrailingWhitespace => write!(f, "trailing-whitespace"),
        }
    }
}

impl std::str::FromStr for Normalization {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "trailing-newline" => Ok(Self::TrailingNewline),
            "trailing-whitespace" => Ok(Self::TrailingWhitespace),
            other => Err(ParityError::config(format!("unknown normalization: {other}"))),
        }
    }
}

/// Which pairs of results are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonMode {
    /// Each result against its predecessor (a == b, b == c)
    #[default]
    Adjacent,
    /// Every result against the first one
    Reference,
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adjacent => write!(f, "adjacent"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

impl std::str::FromStr for ComparisonMode {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "adjacent" => Ok(Self::Adjacent),
            "reference" => Ok(Self::Reference),
            other => Err(ParityError::config(format!("unknown comparison mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComparePolicy {
    pub mode: ComparisonMode,
    pub normalization: Normalization,
}

/// Find the first byte where `a` and `b` differ, `None` if equal.
pub fn first_divergence(a: &[u8], b: &[u8]) -> Option<Divergence> {
    let byte_offset = match a.iter().zip(b.iter()).position(|(x, y)| x != y) {
        Some(pos) => pos,
        None if a.len() == b.len() => return None,
        None => a.len().min(b.len()),
    };
    let line = 1 + a[..byte_offset].iter().filter(|&&b| b == b'\n').count();
    Some(Divergence { byte_offset, line })
}

/// Assert that every result's stdout agrees under `policy`.
///
/// Requires at least two results; a single run proves nothing about
/// equivalence.
pub fn assert_equivalent(results: &[ExecutionResult], policy: &ComparePolicy) -> Result<()> {
    if results.len() < 2 {
        return Err(ParityError::invalid_case(
            results.first().map(|r| r.variant.as_str()).unwrap_or("<empty>"),
            format!("equivalence needs at least 2 results, got {}", results.len()),
        ));
    }

    let pairs: Vec<(&ExecutionResult, &ExecutionResult)> = match policy.mode {
        ComparisonMode::Adjacent => results.windows(2).map(|w| (&w[0], &w[1])).collect(),
        ComparisonMode::Reference => results[1..].iter().map(|r| (&results[0], r)).collect(),
    };

    for (left, right) in pairs {
        let lhs = policy.normalization.apply(&left.stdout);
        let rhs = policy.normalization.apply(&right.stdout);
        if let Some(divergence) = first_divergence(lhs, rhs) {
            tracing::warn!(
                left = %left.variant,
                right = %right.variant,
                byte = divergence.byte_offset,
                line = divergence.line,
                "variant outputs diverge"
            );
            return Err(ParityError::OutputMismatch {
                left: left.variant.clone(),
                right: right.variant.clone(),
                divergence,
                left_output: left.stdout_text(),
                right_output: right.stdout_text(),
            });
        }
        tracing::debug!(left = %left.variant, right = %right.variant, "outputs match");
    }

    Ok(())
}
