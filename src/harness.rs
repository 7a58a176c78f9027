//! Per-case orchestration
//!
//! For each case: resolve fixtures, build one command line per variant, run
//! the variants, then compare. A variant that fails to run ends the case
//! with that variant's error; outputs are only compared once every variant
//! succeeded.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tracing::{error, info, instrument, warn};

use crate::case::{CheckKind, TestCase};
use crate::compare::{assert_equivalent, first_divergence};
use crate::config::HarnessConfig;
use crate::error::{ParityError, Result};
use crate::fixtures::Fixtures;
use crate::report::{CaseReport, SessionReport, VariantOutcome};
use crate::runner::{ExecutionResult, ProcessRunner, SampleRunner};
use crate::variant::{CommandLine, SampleInput};

pub struct EquivalenceHarness {
    config: HarnessConfig,
    runner: Arc<dyn SampleRunner>,
    fixtures: Arc<Fixtures>,
}

impl EquivalenceHarness {
    pub fn new(
        config: HarnessConfig,
        runner: Arc<dyn SampleRunner>,
        fixtures: Arc<Fixtures>,
    ) -> Self {
        Self { config, runner, fixtures }
    }

    /// Harness that runs variants as real subprocesses.
    pub fn with_process_runner(config: HarnessConfig, fixtures: Arc<Fixtures>) -> Self {
        Self::new(config, Arc::new(ProcessRunner), fixtures)
    }

    pub fn fixtures(&self) -> &Arc<Fixtures> {
        &self.fixtures
    }

    /// Run one case and report on it. Never fails; failures are recorded in
    /// the report.
    #[instrument(skip_all, fields(case = %case.id))]
    pub async fn run_case(&self, case: &TestCase) -> CaseReport {
        let start = Instant::now();
        let (variants, verdict) = self.execute(case).await;
        match &verdict {
            Ok(()) => info!("case passed"),
            Err(e) => error!(kind = ?e.kind(), "case failed: {e}"),
        }
        CaseReport::new(case, variants, &verdict, start.elapsed())
    }

    /// Run one case and return its verdict as an error.
    pub async fn check_case(&self, case: &TestCase) -> Result<()> {
        self.execute(case).await.1
    }

    /// Run `cases` in order, sharing fixtures between them.
    pub async fn run_session(&self, cases: &[TestCase]) -> SessionReport {
        let start = Instant::now();
        info!("Running {} case(s)", cases.len());
        let mut reports = Vec::with_capacity(cases.len());
        for case in cases {
            reports.push(self.run_case(case).await);
        }
        SessionReport::new(
            reports,
            self.config.normalization,
            self.config.comparison,
            self.fixtures.stats(),
            start.elapsed(),
        )
    }

    async fn execute(&self, case: &TestCase) -> (Vec<VariantOutcome>, Result<()>) {
        let skipped = || -> Vec<VariantOutcome> {
            case.variants.iter().map(|v| VariantOutcome::skipped(&v.name)).collect()
        };

        if let Err(e) = case.validate() {
            return (skipped(), Err(e));
        }
        let input = match self.prepare(case).await {
            Ok(input) => input,
            Err(e) => return (skipped(), Err(e)),
        };

        let commands: Vec<CommandLine> = case.variants.iter().map(|v| v.command(&input)).collect();
        let runs = self.run_all(&commands).await;

        let mut outcomes = Vec::with_capacity(commands.len());
        let mut results = Vec::with_capacity(commands.len());
        let mut first_error = None;
        for (command, run) in commands.iter().zip(runs) {
            match run {
                None => outcomes.push(VariantOutcome::skipped(&command.variant)),
                Some(Ok(result)) => {
                    outcomes.push(VariantOutcome::passed(&result));
                    results.push(result);
                }
                Some(Err(e)) => {
                    let display = command.to_string();
                    outcomes.push(VariantOutcome::failed(&command.variant, display, &e));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return (outcomes, Err(e));
        }

        if self.config.check_determinism {
            if let (Some(command), Some(first)) = (commands.first(), results.first()) {
                if let Err(e) = self.check_determinism(command, first).await {
                    return (outcomes, Err(e));
                }
            }
        }

        let verdict = match case.kind {
            CheckKind::Equivalence => assert_equivalent(&results, &self.config.compare_policy()),
            CheckKind::Smoke => Ok(()),
        };
        (outcomes, verdict)
    }

    async fn prepare(&self, case: &TestCase) -> Result<SampleInput> {
        let model_path = self.fixtures.model(&case.model).await?;
        let aux_path = match &case.artifact {
            Some(name) => Some(self.fixtures.artifact(name).await?),
            None => None,
        };
        Ok(SampleInput {
            model_path,
            aux_path,
            args: case.args.clone(),
            env: case.env.clone(),
            stdin: case.stdin.clone(),
        })
    }

    /// `None` marks a variant skipped after an earlier failure.
    async fn run_all(&self, commands: &[CommandLine]) -> Vec<Option<Result<ExecutionResult>>> {
        let timeout = self.config.variant_timeout();

        if self.config.parallel {
            let runs = commands.iter().map(|command| self.runner.run(command, timeout));
            return join_all(runs).await.into_iter().map(Some).collect();
        }

        let mut runs = Vec::with_capacity(commands.len());
        let mut failed = false;
        for command in commands {
            if failed && self.config.fail_fast {
                warn!(variant = %command.variant, "skipped after earlier failure");
                runs.push(None);
                continue;
            }
            let run = self.runner.run(command, timeout).await;
            failed |= run.is_err();
            runs.push(Some(run));
        }
        runs
    }

    /// Rerun `command` and require the same output as `first`.
    async fn check_determinism(
        &self,
        command: &CommandLine,
        first: &ExecutionResult,
    ) -> Result<()> {
        let rerun = self.runner.run(command, self.config.variant_timeout()).await?;
        let normalization = self.config.normalization;
        let lhs = normalization.apply(&first.stdout);
        let rhs = normalization.apply(&rerun.stdout);
        match first_divergence(lhs, rhs) {
            None => Ok(()),
            Some(divergence) => {
                warn!(variant = %command.variant, "variant is not deterministic");
                Err(ParityError::OutputMismatch {
                    left: first.variant.clone(),
                    right: format!("{} (rerun)", first.variant),
                    divergence,
                    left_output: first.stdout_text(),
                    right_output: rerun.stdout_text(),
                })
            }
        }
    }
}
