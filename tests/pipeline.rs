//! Pipeline Integration Tests
//!
//! End-to-end runs of the built-in chains against a scripted generator.

mod common;

use std::sync::Arc;

use alphaforge::adapters::TransportError;
use alphaforge::core::{Journal, Pipeline, Runner};
use alphaforge::domain::context::{FOCUS, SEED_DOCUMENTS};
use alphaforge::domain::{
    ArtifactKind, CollisionPolicy, ContextValue, EventType, PipelineContext, RunState,
};
use serde_yaml::Value;
use tempfile::TempDir;

use common::*;

fn focus(text: &str) -> PipelineContext {
    let mut ctx = PipelineContext::new();
    ctx.insert(FOCUS, ContextValue::Text(text.to_string())).unwrap();
    ctx
}

fn seeds() -> Value {
    let docs: Vec<Value> = [
        "feature: volume_ratio_20\ntarget: fwd_ret_5\nrelationship: negative at extremes\n",
        "feature: rsi_14\ntarget: fwd_ret_5\nrelationship: weak\n",
    ]
    .iter()
    .map(|d| serde_yaml::from_str(d).unwrap())
    .collect();
    Value::Sequence(docs)
}

#[tokio::test]
async fn test_feature_chain() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA, FEATURE_CODE, FEATURE_CODE, EXPLANATION]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("feature").unwrap();

    let outcome = runner.run(&pipeline, focus("volume anomalies")).await.unwrap();
    assert!(outcome.succeeded(), "run failed: {:?}", outcome.run.state);

    let key = format!("volume_spike_ratio_{}", STAMP);
    assert_eq!(outcome.context.lineage_key(), Some(key.as_str()));
    assert_eq!(generator.stages(), vec!["idea", "code", "refine", "explanation"]);

    let refined = std::fs::read_to_string(temp.path().join("code_refined").join(format!("{}.py", key))).unwrap();
    assert_eq!(refined, FEATURE_REFINED);
    assert_eq!(outcome.context.text("code_refined"), Some(FEATURE_REFINED));

    let idea: Value = serde_yaml::from_str(
        &std::fs::read_to_string(temp.path().join("ideas").join(format!("{}.yaml", key))).unwrap(),
    )
    .unwrap();
    assert_eq!(idea["idea"], Value::from("volume_spike_ratio"));
    assert_eq!(idea["focus"], Value::from("volume anomalies"));
    assert_eq!(idea["created_at"], Value::from("2024-01-02 03:04:05"));

    assert!(temp.path().join("code").join(format!("{}.py", key)).exists());
    assert!(temp.path().join("explanations").join(format!("{}.md", key)).exists());

    // Every artifact of the run shares one lineage key
    let run = &outcome.run;
    assert_eq!(run.artifacts.len(), 4);
    assert!(run.artifacts.values().all(|a| a.lineage_key == key));
    assert_eq!(run.stages_completed, 4);
}

#[tokio::test]
async fn test_feature_chain_request_shape() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA, FEATURE_CODE, FEATURE_CODE, EXPLANATION]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("feature").unwrap();

    runner.run(&pipeline, focus("future_returns drift")).await.unwrap();

    let requests = generator.requests();
    assert_eq!(requests[0].temperature, 0.75);
    assert_eq!(requests[1].temperature, 0.35);
    assert_eq!(requests[2].temperature, 0.2);
    assert!(requests.iter().all(|r| !r.user.contains("future_") && !r.system.contains("future_")));

    // Downstream prompts embed upstream artifacts
    assert!(requests[1].user.contains("volume_spike_ratio"));
    assert!(requests[3].user.contains("def volume_spike_ratio"));
    assert!(!requests[3].user.contains("def zscore"));
}

#[tokio::test]
async fn test_alpha_chain() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[CONCEPT, FORMULA, ALPHA_CODE, ALPHA_CODE]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("alpha").unwrap();

    let mut inputs = focus("volume exhaustion");
    inputs.insert(SEED_DOCUMENTS, ContextValue::Document(seeds())).unwrap();

    let outcome = runner.run(&pipeline, inputs).await.unwrap();
    assert!(outcome.succeeded(), "run failed: {:?}", outcome.run.state);

    // bundle makes no request
    assert_eq!(generator.stages(), vec!["concept", "formula", "code", "refine"]);

    let key = format!("volume_exhaustion_reversal_{}", STAMP);
    assert_eq!(outcome.run.lineage_key.as_deref(), Some(key.as_str()));

    let requests = generator.requests();
    assert!(requests[0].user.contains("volume_ratio_20"));
    assert!(requests[0].user.contains("\n\n---\n\n"));
    assert!(requests[2].user.contains("Volume Exhaustion Reversal"));
    assert!(requests[2].user.contains("vol_exhaustion"));

    let bundle = outcome.context.document("bundle").unwrap();
    assert_eq!(bundle["alpha_concept"]["name"], Value::from("Volume Exhaustion Reversal"));
    assert_eq!(bundle["alpha_formula"]["name"], Value::from("vol_exhaustion"));
    assert_eq!(bundle["meta"]["concept_file"], Value::from(format!("{}.yaml", key)));
    assert_eq!(bundle["meta"]["formula_file"], Value::from(format!("{}.yaml", key)));
    assert_eq!(bundle["meta"]["focus"], Value::from("volume exhaustion"));
    assert_eq!(bundle["meta"]["combined_at"], Value::from("2024-01-02T03:04:05"));

    let formula = outcome.context.document("formula").unwrap();
    assert_eq!(formula["meta"]["concept_file"], Value::from(format!("{}.yaml", key)));

    let refined = outcome.context.text("code_refined").unwrap();
    assert_eq!(refined, format!("from typing import Tuple\n{}", ALPHA_CODE));

    for kind in [
        ArtifactKind::Concept,
        ArtifactKind::Formula,
        ArtifactKind::Bundle,
        ArtifactKind::Code,
        ArtifactKind::CodeRefined,
    ] {
        let record = &outcome.run.artifacts[&kind];
        assert_eq!(record.lineage_key, key);
        assert!(record.path.exists(), "{} missing", kind);
    }
}

#[tokio::test]
async fn test_report_chain() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[CONCEPT, FORMULA, REPORT]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("report").unwrap();

    let mut inputs = focus("volume exhaustion");
    inputs.insert(SEED_DOCUMENTS, ContextValue::Document(seeds())).unwrap();

    let outcome = runner.run(&pipeline, inputs).await.unwrap();
    assert!(outcome.succeeded(), "run failed: {:?}", outcome.run.state);
    assert_eq!(generator.stages(), vec!["concept", "formula", "report"]);

    let key = format!("volume_exhaustion_reversal_{}", STAMP);
    let path = temp.path().join("reports").join(format!("{}.md", key));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), REPORT);
    assert_eq!(outcome.run.artifacts[&ArtifactKind::Report].path, path);
    assert_eq!(outcome.run.artifacts.len(), 4);

    // The report is written from the bundle, not from code
    let requests = generator.requests();
    let request = &requests[2];
    assert_eq!(request.temperature, 0.2);
    assert!(request.user.contains("alpha definition"));
    assert!(request.user.contains("Volume Exhaustion Reversal"));
    assert!(request.user.contains("concept_file"));
    assert!(!temp.path().join("code").exists());
}

#[tokio::test]
async fn test_failed_stage_truncates_chain() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[
        IDEA,
        "I'm sorry, I can't write that function.",
        FEATURE_CODE,
        EXPLANATION,
    ]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("feature").unwrap();

    let outcome = runner.run(&pipeline, PipelineContext::new()).await.unwrap();

    let RunState::Failed { stage, error } = &outcome.run.state else {
        panic!("expected failure, got {:?}", outcome.run.state);
    };
    assert_eq!(stage, "code");
    assert!(error.contains("no function definition"));

    // Later stages are never called
    assert_eq!(generator.stages(), vec!["idea", "code"]);

    let key = format!("volume_spike_ratio_{}", STAMP);
    assert!(temp.path().join("ideas").join(format!("{}.yaml", key)).exists());
    assert!(!temp.path().join("code").join(format!("{}.py", key)).exists());
    assert!(!temp.path().join("code_refined").exists());
    assert!(!outcome.context.contains("code"));
}

#[tokio::test]
async fn test_refine_rejection_fails_run() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[
        IDEA,
        FEATURE_CODE,
        "def f(series):\n    return series.mean()\n",
        EXPLANATION,
    ]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("feature").unwrap();

    let outcome = runner.run(&pipeline, PipelineContext::new()).await.unwrap();

    assert!(matches!(&outcome.run.state, RunState::Failed { stage, .. } if stage == "refine"));
    assert_eq!(generator.stages().len(), 3);
}

#[tokio::test]
async fn test_journal_replay_reflects_failure() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA, "no code here"]);
    let runner = runner(temp.path(), generator);
    let pipeline = Pipeline::builtin("feature").unwrap();

    let outcome = runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    let key = outcome.run.lineage_key.clone().unwrap();

    let journal = Journal::new(temp.path());
    let events = journal.replay(&key).await.unwrap();
    assert_eq!(events.first().map(|e| e.event_type), Some(EventType::RunStarted));
    assert_eq!(events.last().map(|e| e.event_type), Some(EventType::RunFailed));
    // Events buffered before the key existed are keyed too
    assert!(events.iter().all(|e| e.lineage_key.as_deref() == Some(key.as_str())));

    let replayed = journal.load_run(&key).await.unwrap().unwrap();
    assert_eq!(replayed.id, outcome.run.id);
    assert_eq!(replayed.pipeline_name, "feature");
    assert_eq!(replayed.stages_completed, 1);
    assert!(replayed.is_stage_completed("idea"));
    assert_eq!(
        replayed.state,
        RunState::Failed {
            stage: "code".to_string(),
            error: "invalid generation: no function definition in generated code".to_string(),
        }
    );
    assert_eq!(replayed.artifacts.len(), 1);
    assert_eq!(replayed.artifacts[&ArtifactKind::Idea], outcome.run.artifacts[&ArtifactKind::Idea]);
}

#[tokio::test]
async fn test_failure_before_lineage_key_journals_under_run_id() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new(vec![Err(TransportError::Api {
        status: 429,
        message: "Rate limit reached".to_string(),
    })]);
    let runner = runner(temp.path(), generator);
    let pipeline = Pipeline::builtin("feature").unwrap();

    let outcome = runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    assert!(outcome.run.lineage_key.is_none());

    let journal = Journal::new(temp.path());
    let run_key = outcome.run.id.to_string();
    assert_eq!(journal.list().await.unwrap(), vec![run_key.clone()]);

    let replayed = journal.load_run(&run_key).await.unwrap().unwrap();
    let RunState::Failed { stage, error } = replayed.state else {
        panic!("expected failure");
    };
    assert_eq!(stage, "idea");
    assert!(error.contains("Rate limit reached"));
}

#[tokio::test]
async fn test_invalid_pipeline_rejected_before_running() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::from_yaml(
        "name: backwards\nstages:\n  - action: idea\n  - action: explain\n    from: code\n  - action: code\n    from: idea\n",
    )
    .unwrap();

    let err = runner.run(&pipeline, PipelineContext::new()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("forward references not allowed"));
    assert!(generator.requests().is_empty());
    assert!(runner.journal().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_alpha_without_seed_documents_is_invalid() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[CONCEPT]);
    let runner = runner(temp.path(), generator.clone());
    let pipeline = Pipeline::builtin("alpha").unwrap();

    assert!(runner.run(&pipeline, focus("x")).await.is_err());
    assert!(generator.requests().is_empty());
}

#[tokio::test]
async fn test_collision_policies() {
    let pipeline = Pipeline::from_yaml("name: ideas\nstages:\n  - action: idea\n").unwrap();
    let base = format!("volume_spike_ratio_{}", STAMP);

    // Accept: the second run reuses and overwrites the key
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA, IDEA]);
    let runner = runner(temp.path(), generator);
    let first = runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    let second = runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    assert_eq!(first.run.lineage_key.as_deref(), Some(base.as_str()));
    assert_eq!(second.run.lineage_key.as_deref(), Some(base.as_str()));
    let latest = runner.journal().load_run(&base).await.unwrap().unwrap();
    assert_eq!(latest.id, second.run.id);

    // Suffix: the second run gets a fresh key
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA, IDEA]);
    let env = env_with_policy(temp.path(), generator, CollisionPolicy::Suffix);
    let runner = Runner::new(env, Journal::new(temp.path()));
    let first = runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    let second = runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    assert_eq!(first.run.lineage_key.as_deref(), Some(base.as_str()));
    assert_eq!(second.run.lineage_key, Some(format!("{}_2", base)));
}

#[tokio::test]
async fn test_scripted_generator_shared_across_runs() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::ok(&[IDEA]);
    let shared: Arc<ScriptedGenerator> = Arc::clone(&generator);
    let runner = runner(temp.path(), shared);
    let pipeline = Pipeline::from_yaml("name: one\nstages:\n  - action: idea\n    temperature: 0.9\n").unwrap();

    runner.run(&pipeline, PipelineContext::new()).await.unwrap();
    assert_eq!(generator.requests()[0].temperature, 0.9);
}
