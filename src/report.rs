//! Case and session reports
//!
//! Text summaries go to stdout for humans; the JSON form doubles as the
//! receipt written with [`SessionReport::write_receipt`].

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::case::{CheckKind, TestCase};
use crate::compare::{ComparisonMode, Normalization};
use crate::error::{FailureKind, ParityError, Result};
use crate::fixtures::CacheStats;
use crate::runner::ExecutionResult;

/// Receipt schema version
pub const RECEIPT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
}

impl Status {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Passed => "✓",
            Self::Failed => "✗",
            Self::Skipped => "-",
        }
    }
}

/// What happened to one variant of a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantOutcome {
    pub variant: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl VariantOutcome {
    pub fn passed(result: &ExecutionResult) -> Self {
        Self {
            variant: result.variant.clone(),
            status: Status::Passed,
            command: Some(result.command.clone()),
            exit_code: result.exit_code,
            duration_ms: millis(result.duration),
            stdout_bytes: result.stdout.len(),
            failure: None,
        }
    }

    pub fn failed(variant: &str, command: String, error: &ParityError) -> Self {
        let exit_code = match error {
            ParityError::NonZeroExit { code, .. } => *code,
            _ => None,
        };
        Self {
            variant: variant.to_string(),
            status: Status::Failed,
            command: Some(command),
            exit_code,
            duration_ms: 0,
            stdout_bytes: 0,
            failure: Some(error.kind()),
        }
    }

    pub fn skipped(variant: &str) -> Self {
        Self {
            variant: variant.to_string(),
            status: Status::Skipped,
            command: None,
            exit_code: None,
            duration_ms: 0,
            stdout_bytes: 0,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub case_id: String,
    pub sample: String,
    pub model: String,
    pub kind: CheckKind,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub variants: Vec<VariantOutcome>,
    pub duration_ms: u64,
}

impl CaseReport {
    pub fn new(
        case: &TestCase,
        variants: Vec<VariantOutcome>,
        verdict: &Result<()>,
        duration: Duration,
    ) -> Self {
        let (status, failure, message) = match verdict {
            Ok(()) => (Status::Passed, None, None),
            Err(e) => (Status::Failed, Some(e.kind()), Some(e.to_string())),
        };
        Self {
            case_id: case.id.clone(),
            sample: case.sample.clone(),
            model: case.model.clone(),
            kind: case.kind,
            status,
            failure,
            message,
            variants,
            duration_ms: millis(duration),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub version: u32,
    /// RFC3339 completion time
    pub timestamp: String,
    pub normalization: Normalization,
    pub comparison: ComparisonMode,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub fixtures: CacheStats,
    pub cases: Vec<CaseReport>,
}

impl SessionReport {
    pub fn new(
        cases: Vec<CaseReport>,
        normalization: Normalization,
        comparison: ComparisonMode,
        fixtures: CacheStats,
        duration: Duration,
    ) -> Self {
        let passed = cases.iter().filter(|c| c.passed()).count();
        Self {
            version: RECEIPT_VERSION,
            timestamp: Utc::now().to_rfc3339(),
            normalization,
            comparison,
            total: cases.len(),
            passed,
            failed: cases.len() - passed,
            duration_ms: millis(duration),
            fixtures,
            cases,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for this session: 0 when every case passed.
    pub fn exit_code(&self) -> u8 {
        if self.all_passed() { 0 } else { 1 }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "\nSample Parity Summary")?;
        writeln!(out, "{}", "═".repeat(60))?;
        writeln!(out, "Normalization:    {}", self.normalization)?;
        writeln!(out, "Comparison:       {}", self.comparison)?;
        writeln!(out)?;

        for case in &self.cases {
            writeln!(
                out,
                "{} {} [{}] ({} ms)",
                case.status.symbol(),
                case.case_id,
                case.kind,
                case.duration_ms
            )?;
            for v in &case.variants {
                let exit = v.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string());
                writeln!(
                    out,
                    "    {} {:<10} exit {:<4} {:>8} ms {:>8} bytes",
                    v.status.symbol(),
                    v.variant,
                    exit,
                    v.duration_ms,
                    v.stdout_bytes
                )?;
            }
            if let Some(message) = &case.message {
                for line in message.lines() {
                    writeln!(out, "    │ {line}")?;
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "{}", "─".repeat(60))?;
        writeln!(
            out,
            "Cases:            {} passed, {} failed, {} total",
            self.passed, self.failed, self.total
        )?;
        writeln!(
            out,
            "Fixtures:         {} resolved, {} cache hits",
            self.fixtures.misses, self.fixtures.hits
        )?;
        let status = if self.all_passed() { "✓ PASSED" } else { "✗ FAILED" };
        writeln!(out, "Overall:          {status}")?;
        writeln!(out, "Exit code:        {}", self.exit_code())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON receipt to `path`, creating parent directories.
    pub fn write_receipt(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        tracing::info!("Receipt written to {}", path.display());
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
