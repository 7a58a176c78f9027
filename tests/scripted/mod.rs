//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sample_parity::{
    CommandLine, EquivalenceHarness, ExecutionResult, FixtureProvider, Fixtures, HarnessConfig,
    ParityError, Result, SampleRunner,
};

/// How a scripted variant behaves when run
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Print this text and exit 0
    Print(String),
    /// Print each text in turn; the last one repeats
    Sequence(Vec<String>),
    /// Exit with this status
    Exit(i32),
    /// Exceed the timeout
    Hang,
}

#[derive(Default)]
pub struct ScriptedRunner {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<CommandLine>>,
    runs_per_variant: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl ScriptedRunner {
    /// Every listed variant prints the same text.
    pub fn uniform(variants: &[&str], text: &str) -> Self {
        let mut runner = Self::default();
        for v in variants {
            runner = runner.with(v, Behavior::Print(text.to_string()));
        }
        runner
    }

    pub fn with(mut self, variant: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(variant.to_string(), behavior);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.variant).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SampleRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(command.clone());
        let attempt = {
            let mut runs = self.runs_per_variant.lock().unwrap();
            let n = runs.entry(command.variant.clone()).or_default();
            *n += 1;
            *n - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .get(&command.variant)
            .cloned()
            .unwrap_or_else(|| Behavior::Print(String::new()));
        match behavior {
            Behavior::Print(text) => Ok(ExecutionResult::with_stdout(&command.variant, text)),
            Behavior::Sequence(texts) => {
                let text = texts.get(attempt).or(texts.last()).cloned().unwrap_or_default();
                Ok(ExecutionResult::with_stdout(&command.variant, text))
            }
            Behavior::Exit(code) => Err(ParityError::NonZeroExit {
                variant: command.variant.clone(),
                command: command.to_string(),
                code: Some(code),
                stderr: format!("{} crashed", command.variant),
            }),
            Behavior::Hang => Err(ParityError::Timeout {
                variant: command.variant.clone(),
                command: command.to_string(),
                timeout: timeout.unwrap_or_default(),
            }),
        }
    }
}

/// Fixture provider that counts how often each name is resolved
#[derive(Default)]
pub struct CountingProvider {
    model_calls: Mutex<HashMap<String, usize>>,
    artifact_calls: Mutex<HashMap<String, usize>>,
    broken: HashSet<String>,
    total: AtomicUsize,
    delay: Duration,
}

impl CountingProvider {
    pub fn broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn model_calls(&self, name: &str) -> usize {
        self.model_calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn artifact_calls(&self, name: &str) -> usize {
        self.artifact_calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    async fn produce(&self, dir: &str, name: &str) -> Result<PathBuf> {
        self.total.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.broken.contains(name) {
            return Err(ParityError::fixture(name, "converter exited with status 1"));
        }
        Ok(PathBuf::from(format!("/fixtures/{dir}/{name}")))
    }
}

#[async_trait]
impl FixtureProvider for CountingProvider {
    async fn resolve_model(&self, name: &str) -> Result<PathBuf> {
        *self.model_calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        self.produce("models", name).await
    }

    async fn resolve_artifact(&self, name: &str) -> Result<PathBuf> {
        *self.artifact_calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        self.produce("artifacts", name).await
    }
}

/// Harness over scripted collaborators, returning handles to both.
pub fn harness(
    config: HarnessConfig,
    runner: ScriptedRunner,
    provider: CountingProvider,
) -> (EquivalenceHarness, Arc<ScriptedRunner>, Arc<CountingProvider>) {
    let runner = Arc::new(runner);
    let provider = Arc::new(provider);
    let fixtures = Arc::new(Fixtures::new(provider.clone()));
    (EquivalenceHarness::new(config, runner.clone(), fixtures), runner, provider)
}
