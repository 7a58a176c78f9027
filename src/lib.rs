//! Cross-implementation output parity for inference sample programs.
//!
//! Each [`TestCase`] names a model, an argument set and the program variants
//! (Python script, C++ binary, C binary) that must agree on it. The
//! [`EquivalenceHarness`] resolves fixtures once per session, runs every
//! variant as a subprocess with identical arguments, and asserts their
//! standard output is identical.

pub mod case;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod harness;
pub mod logging;
pub mod report;
pub mod runner;
pub mod variant;

pub use case::{CaseSelector, CheckKind, TestCase};
pub use catalog::Catalog;
pub use compare::{ComparePolicy, ComparisonMode, Normalization, assert_equivalent};
pub use config::{HarnessConfig, LogLevel, SamplesLayout};
pub use error::{Divergence, FailureKind, ParityError, Result};
pub use fixtures::{CacheStats, CatalogProvider, FixtureProvider, Fixtures};
pub use harness::EquivalenceHarness;
pub use report::{CaseReport, SessionReport, Status, VariantOutcome};
pub use runner::{ExecutionResult, ProcessRunner, SampleRunner, run_variant};
pub use variant::{CommandLine, ProgramVariant, SampleInput, SampleLanguage};
