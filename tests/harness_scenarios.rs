//! Harness behaviour over scripted runners and fixture providers.

mod scripted;

use std::path::PathBuf;
use std::time::Duration;

use sample_parity::report::Status;
use sample_parity::{
    Catalog, CheckKind, FailureKind, HarnessConfig, ParityError, ProgramVariant, SampleLanguage,
    SamplesLayout, TestCase,
};
use scripted::{Behavior, CountingProvider, ScriptedRunner, harness};

const ALL: &[&str] = &["python", "cpp", "c"];

fn builtin_cases() -> Vec<TestCase> {
    Catalog::builtin().build_cases(&SamplesLayout::default()).unwrap()
}

fn builtin(id: &str) -> TestCase {
    builtin_cases().into_iter().find(|c| c.id == id).unwrap()
}

#[tokio::test]
async fn two_variant_case_passes_on_identical_output() {
    let case = builtin("greedy_causal_lm/SmolLM-135M");
    let (h, runner, provider) = harness(
        HarnessConfig::default(),
        ScriptedRunner::uniform(&["python", "cpp"], "return 0;\n"),
        CountingProvider::default(),
    );

    h.check_case(&case).await.unwrap();

    assert_eq!(runner.ran(), ["python", "cpp"]);
    assert_eq!(provider.model_calls("SmolLM-135M"), 1);
    for call in runner.calls() {
        let args: Vec<String> =
            call.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let model_at = args.iter().position(|a| a == "/fixtures/models/SmolLM-135M").unwrap();
        assert_eq!(args[model_at + 1], "return 0");
        assert_eq!(args.len(), model_at + 2);
    }
}

#[tokio::test]
async fn three_variant_case_passes_on_identical_output() {
    let case = builtin("greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0");
    assert_eq!(case.args, ["test"]);
    let (h, runner, _) = harness(
        HarnessConfig::default(),
        ScriptedRunner::uniform(ALL, "test test test\n"),
        CountingProvider::default(),
    );

    let report = h.run_case(&case).await;

    assert_eq!(report.status, Status::Passed);
    assert_eq!(runner.ran(), ALL);
    assert!(report.variants.iter().all(|v| v.status == Status::Passed));
}

#[tokio::test]
async fn smoke_case_passes_with_its_artifact_in_place() {
    let case = builtin("lora/TinyStories-1M");
    assert_eq!(case.kind, CheckKind::Smoke);
    let (h, runner, provider) = harness(
        HarnessConfig::default(),
        ScriptedRunner::uniform(&["python"], "SELECT 1"),
        CountingProvider::default(),
    );

    h.check_case(&case).await.unwrap();

    assert_eq!(provider.artifact_calls("adapter_model.safetensors"), 1);
    let call = &runner.calls()[0];
    let args: Vec<String> = call.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
    let model_at = args.iter().position(|a| a == "/fixtures/models/TinyStories-1M").unwrap();
    assert_eq!(args[model_at + 1], "/fixtures/artifacts/adapter_model.safetensors");
    assert!(args[model_at + 2].starts_with("How to create a table"));
}

#[tokio::test]
async fn mismatch_names_both_variants() {
    let case = builtin("greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0");
    let runner = ScriptedRunner::uniform(ALL, "test output\n")
        .with("c", Behavior::Print("test outpuT\n".into()));
    let (h, _, _) = harness(HarnessConfig::default(), runner, CountingProvider::default());

    let err = h.check_case(&case).await.unwrap_err();
    match err {
        ParityError::OutputMismatch { left, right, divergence, left_output, right_output } => {
            assert_eq!((left.as_str(), right.as_str()), ("cpp", "c"));
            assert_eq!(divergence.byte_offset, 10);
            assert_eq!(left_output, "test output\n");
            assert_eq!(right_output, "test outpuT\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn failing_variant_is_reported_instead_of_a_mismatch() {
    let case = builtin("greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0");
    let runner = ScriptedRunner::uniform(ALL, "same\n").with("cpp", Behavior::Exit(139));
    let (h, runner, _) = harness(HarnessConfig::default(), runner, CountingProvider::default());

    let report = h.run_case(&case).await;

    assert_eq!(report.failure, Some(FailureKind::NonZeroExit));
    assert!(report.message.as_deref().unwrap().contains("cpp crashed"));
    let statuses: Vec<Status> = report.variants.iter().map(|v| v.status).collect();
    assert_eq!(statuses, [Status::Passed, Status::Failed, Status::Skipped]);
    assert_eq!(report.variants[1].exit_code, Some(139));
    assert_eq!(runner.ran(), ["python", "cpp"]);
}

#[tokio::test]
async fn without_fail_fast_every_variant_runs() {
    let case = builtin("greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0");
    let config = HarnessConfig { fail_fast: false, ..HarnessConfig::default() };
    let runner = ScriptedRunner::uniform(ALL, "same\n").with("python", Behavior::Exit(1));
    let (h, runner, _) = harness(config, runner, CountingProvider::default());

    let report = h.run_case(&case).await;

    assert_eq!(report.failure, Some(FailureKind::NonZeroExit));
    assert_eq!(runner.ran(), ALL);
    assert_eq!(report.variants[2].status, Status::Passed);
}

#[tokio::test]
async fn timeout_is_its_own_failure_kind() {
    let case = builtin("greedy_causal_lm/Qwen2.5-0.5B-Instruct");
    let runner = ScriptedRunner::uniform(ALL, "69").with("python", Behavior::Hang);
    let (h, _, _) = harness(HarnessConfig::default(), runner, CountingProvider::default());

    let report = h.run_case(&case).await;

    assert_eq!(report.failure, Some(FailureKind::Timeout));
    assert!(report.message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn parallel_mode_runs_variants_concurrently() {
    let case = builtin("greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0");
    let config = HarnessConfig { parallel: true, ..HarnessConfig::default() };
    let runner = ScriptedRunner::uniform(ALL, "x").with_delay(Duration::from_millis(50));
    let (h, runner, _) = harness(config, runner, CountingProvider::default());

    h.check_case(&case).await.unwrap();

    assert_eq!(runner.max_in_flight(), 3);
}

#[tokio::test]
async fn sequential_mode_runs_one_variant_at_a_time() {
    let case = builtin("greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0");
    let runner = ScriptedRunner::uniform(ALL, "x").with_delay(Duration::from_millis(10));
    let (h, runner, _) = harness(HarnessConfig::default(), runner, CountingProvider::default());

    h.check_case(&case).await.unwrap();

    assert_eq!(runner.max_in_flight(), 1);
}

#[tokio::test]
async fn broken_fixture_fails_every_dependent_case_once() {
    let mut cases = builtin_cases();
    let mut second = cases[0].clone();
    second.id = "greedy_causal_lm/TinyLlama-1.1B-Chat-v1.0/again".into();
    cases.insert(1, second);

    let (h, runner, provider) = harness(
        HarnessConfig::default(),
        ScriptedRunner::uniform(ALL, "ok"),
        CountingProvider::default().broken("TinyLlama-1.1B-Chat-v1.0"),
    );

    let session = h.run_session(&cases).await;

    assert_eq!(session.total, 5);
    assert_eq!(session.failed, 2);
    for report in &session.cases[..2] {
        assert_eq!(report.failure, Some(FailureKind::FixtureResolution));
        assert!(report.variants.iter().all(|v| v.status == Status::Skipped));
    }
    assert_eq!(provider.model_calls("TinyLlama-1.1B-Chat-v1.0"), 1);
    assert!(!runner.calls().iter().any(|c| {
        c.args.iter().any(|a| a.to_string_lossy().contains("TinyLlama"))
    }));
}

#[tokio::test]
async fn session_resolves_each_fixture_once() {
    let mut cases = builtin_cases();
    let mut repeat = cases[2].clone();
    repeat.id.push_str("/repeat");
    cases.push(repeat);

    let (h, _, provider) = harness(
        HarnessConfig::default(),
        ScriptedRunner::uniform(ALL, "same"),
        CountingProvider::default(),
    );

    let session = h.run_session(&cases).await;

    assert!(session.all_passed(), "{}", session.render_text());
    assert_eq!(provider.model_calls("Qwen2.5-0.5B-Instruct"), 1);
    assert_eq!(provider.total(), 5);
    let stats = h.fixtures().stats();
    assert_eq!(stats.misses, 5);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn determinism_check_catches_unstable_output() {
    let case = builtin("greedy_causal_lm/SmolLM-135M");
    let config = HarnessConfig { check_determinism: true, ..HarnessConfig::default() };
    let runner = ScriptedRunner::uniform(&["cpp"], "stable").with(
        "python",
        Behavior::Sequence(vec!["stable".into(), "drifted".into()]),
    );
    let (h, runner, _) = harness(config, runner, CountingProvider::default());

    let err = h.check_case(&case).await.unwrap_err();

    match err {
        ParityError::OutputMismatch { left, right, .. } => {
            assert_eq!(left, "python");
            assert_eq!(right, "python (rerun)");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.ran(), ["python", "cpp", "python"]);
}

#[tokio::test]
async fn single_variant_equivalence_is_rejected_before_running() {
    let case = TestCase {
        id: "lonely".into(),
        sample: "greedy_causal_lm".into(),
        model: "SmolLM-135M".into(),
        args: vec!["x".into()],
        artifact: None,
        kind: CheckKind::Equivalence,
        variants: vec![ProgramVariant::native(
            "cpp",
            SampleLanguage::Cpp,
            PathBuf::from("/samples/cpp/greedy_causal_lm"),
        )],
        tags: Vec::new(),
        stdin: None,
        env: Vec::new(),
    };
    let (h, runner, provider) = harness(
        HarnessConfig::default(),
        ScriptedRunner::uniform(&["cpp"], "x"),
        CountingProvider::default(),
    );

    let err = h.check_case(&case).await.unwrap_err();

    assert!(matches!(err, ParityError::InvalidCase { .. }));
    assert!(runner.calls().is_empty());
    assert_eq!(provider.total(), 0);
}

#[tokio::test]
async fn declared_normalization_is_applied() {
    use sample_parity::Normalization;

    let case = builtin("greedy_causal_lm/SmolLM-135M");
    let runner =
        ScriptedRunner::uniform(&["python"], "0\n").with("cpp", Behavior::Print("0".into()));

    let (strict, _, _) = harness(HarnessConfig::default(), runner, CountingProvider::default());
    assert!(strict.check_case(&case).await.is_err());

    let config = HarnessConfig {
        normalization: Normalization::TrailingNewline,
        ..HarnessConfig::default()
    };
    let runner =
        ScriptedRunner::uniform(&["python"], "0\n").with("cpp", Behavior::Print("0".into()));
    let (lenient, _, _) = harness(config, runner, CountingProvider::default());
    lenient.check_case(&case).await.unwrap();
}
