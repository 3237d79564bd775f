//! Stage functions.
//!
//! A stage reads what it needs from the context, calls the generator (or
//! a pure transform), validates the result, persists it under the run's
//! lineage key and returns the new context entries. Stages never report or
//! swallow errors; the runner decides what a failure means.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::prompts;
use super::store::{load_document, ArtifactStore, StoreError};
use crate::adapters::{GenerationRequest, Generator, TransportError};
use crate::domain::context::{FOCUS, LINEAGE_KEY, SEED_DOCUMENTS};
use crate::domain::{
    ArtifactKind, CollisionPolicy, ContextConflict, ContextUpdate, LineageKeyGenerator, Payload,
    PipelineContext,
};
use crate::hygiene::{extract_fence, HygieneEngine};

/// Keys an idea document must carry
pub const IDEA_REQUIRED_KEYS: [&str; 5] = ["idea", "family", "dependencies", "parameters", "description"];

/// Minimum explanation length, in characters, after fence removal
pub const MIN_EXPLANATION_CHARS: usize = 50;

static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("invalid fence pattern"));

#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing upstream input '{0}'")]
    MissingUpstream(String),

    #[error("invalid generation: {0}")]
    GenerationInvalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    ContextConflict(#[from] ContextConflict),
}

impl StageError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::GenerationInvalid(reason.into())
    }
}

/// Collaborators shared by every stage of a run
pub struct StageEnv {
    pub generator: Arc<dyn Generator>,
    pub store: ArtifactStore,
    pub hygiene: HygieneEngine,
    pub lineage: LineageKeyGenerator,
}

/// One step of a pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError>;
}

// ============================================================================
// Shared helpers
// ============================================================================

fn require_document<'c>(ctx: &'c PipelineContext, key: &str) -> Result<&'c Value, StageError> {
    ctx.document(key)
        .ok_or_else(|| StageError::MissingUpstream(key.to_string()))
}

fn require_text<'c>(ctx: &'c PipelineContext, key: &str) -> Result<&'c str, StageError> {
    ctx.text(key)
        .ok_or_else(|| StageError::MissingUpstream(key.to_string()))
}

fn require_path<'c>(ctx: &'c PipelineContext, key: &str) -> Result<&'c Path, StageError> {
    ctx.path(key)
        .ok_or_else(|| StageError::MissingUpstream(key.to_string()))
}

fn require_lineage(ctx: &PipelineContext) -> Result<&str, StageError> {
    require_text(ctx, LINEAGE_KEY)
}

/// Upstream payload of any kind, rendered as text
fn upstream_text(ctx: &PipelineContext, kind: ArtifactKind) -> Result<String, StageError> {
    if kind.is_document() {
        render_yaml(require_document(ctx, kind.context_key())?)
    } else {
        require_text(ctx, kind.context_key()).map(str::to_string)
    }
}

fn render_yaml(value: &Value) -> Result<String, StageError> {
    serde_yaml::to_string(value).map_err(|e| StageError::invalid(format!("cannot render document: {}", e)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse a generated YAML mapping, tolerating a fence and a top-level list
fn parse_document(text: &str) -> Result<Value, StageError> {
    let parsed: Value = serde_yaml::from_str(extract_fence(text))
        .map_err(|e| StageError::invalid(format!("response is not valid YAML: {}", e)))?;
    let parsed = match parsed {
        Value::Sequence(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    if !parsed.is_mapping() {
        return Err(StageError::invalid("response is not a YAML mapping"));
    }
    Ok(parsed)
}

fn set_meta(doc: &mut Value, key: &str, value: Value) {
    let Some(map) = doc.as_mapping_mut() else {
        return;
    };
    if !map.get("meta").is_some_and(Value::is_mapping) {
        map.insert(Value::from("meta"), Value::Mapping(Mapping::new()));
    }
    if let Some(Value::Mapping(meta)) = map.get_mut("meta") {
        meta.insert(Value::from(key), value);
    }
}

fn insert(doc: &mut Value, key: &str, value: Value) {
    if let Some(map) = doc.as_mapping_mut() {
        map.insert(Value::from(key), value);
    }
}

/// Scrub the request, call the generator, return its raw text
async fn generate(
    env: &StageEnv,
    stage: &str,
    system: &str,
    user: &str,
    temperature: f32,
) -> Result<String, StageError> {
    let request = GenerationRequest::new(stage, env.hygiene.scrub(system), env.hygiene.scrub(user))
        .with_temperature(temperature);

    debug!(stage, generator = env.generator.name(), "Requesting generation");
    let text = env.generator.generate(&request).await?;
    debug!(stage, chars = text.len(), "Generation received");
    Ok(text)
}

/// New lineage key for `label`, applying the collision policy
async fn assign_lineage_key(env: &StageEnv, label: &str) -> String {
    let base = env.lineage.generate(label);
    if env.lineage.policy() == CollisionPolicy::Accept {
        return base;
    }

    let mut attempt = 1;
    loop {
        let candidate = LineageKeyGenerator::candidate(&base, attempt);
        if !env.store.lineage_exists(&candidate).await {
            return candidate;
        }
        attempt += 1;
    }
}

async fn persist(
    env: &StageEnv,
    kind: ArtifactKind,
    lineage_key: &str,
    payload: Payload,
) -> Result<ContextUpdate, StageError> {
    let artifact = env.store.save(kind, lineage_key, payload).await?;
    info!(kind = %kind, lineage_key, path = %artifact.location.display(), "Saved artifact");
    Ok(ContextUpdate::new().artifact(&artifact))
}

// ============================================================================
// Ideation
// ============================================================================

/// Feature ideation; creates the lineage key from the `idea` field
pub struct IdeaStage {
    pub temperature: f32,
}

#[async_trait]
impl Stage for IdeaStage {
    fn name(&self) -> &str {
        "idea"
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let focus = ctx.text(FOCUS).unwrap_or(prompts::DEFAULT_FEATURE_FOCUS);
        let raw = generate(env, self.name(), prompts::IDEA_SYSTEM, &prompts::idea_user(focus), self.temperature).await?;

        let mut doc = parse_document(&raw)?;
        let missing: Vec<&str> = IDEA_REQUIRED_KEYS
            .into_iter()
            .filter(|k| doc.get(*k).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(StageError::invalid(format!("idea is missing fields: {}", missing.join(", "))));
        }

        let label = doc
            .get("idea")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::invalid("idea name is not a string"))?
            .to_string();
        insert(&mut doc, "created_at", Value::from(env.lineage.now().format("%Y-%m-%d %H:%M:%S").to_string()));
        insert(&mut doc, "focus", Value::from(focus));

        let key = assign_lineage_key(env, &label).await;
        let update = persist(env, ArtifactKind::Idea, &key, Payload::Document(doc)).await?;
        Ok(update.lineage_key(&key))
    }
}

/// Alpha ideation from seed documents; creates the lineage key from
/// `alpha_concept.name`
pub struct ConceptStage {
    pub temperature: f32,
}

#[async_trait]
impl Stage for ConceptStage {
    fn name(&self) -> &str {
        "concept"
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let seeds = require_document(ctx, SEED_DOCUMENTS)?;
        let documents = match seeds {
            Value::Sequence(items) => items
                .iter()
                .map(render_yaml)
                .collect::<Result<Vec<_>, _>>()?
                .join("\n\n---\n\n"),
            other => render_yaml(other)?,
        };
        let focus = ctx.text(FOCUS).unwrap_or(prompts::DEFAULT_ALPHA_FOCUS);

        let raw = generate(
            env,
            self.name(),
            prompts::CONCEPT_SYSTEM,
            &prompts::concept_user(focus, &documents),
            self.temperature,
        )
        .await?;

        let mut doc = parse_document(&raw)?;
        let label = doc
            .get("alpha_concept")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::invalid("concept has no alpha_concept.name"))?
            .to_string();
        set_meta(&mut doc, "focus", Value::from(focus));

        let key = assign_lineage_key(env, &label).await;
        let update = persist(env, ArtifactKind::Concept, &key, Payload::Document(doc)).await?;
        Ok(update.lineage_key(&key))
    }
}

/// Randomly pick up to `size` `*.yaml` documents from `dir`.
///
/// With a `tag`, only documents whose top-level `tag` field equals it are
/// eligible, and finding none is an error.
pub async fn sample_documents(
    dir: &Path,
    size: usize,
    tag: Option<&str>,
    seed: Option<u64>,
) -> Result<Vec<Value>, StoreError> {
    let pattern = dir.join("*.yaml");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map(|paths| paths.filter_map(Result::ok).collect())
        .unwrap_or_default();
    if files.is_empty() {
        return Err(StoreError::NotFound {
            path: pattern,
        });
    }
    files.sort();

    let candidates: Vec<(PathBuf, Option<Value>)> = match tag {
        None => files.into_iter().map(|path| (path, None)).collect(),
        Some(tag) => {
            let mut matched = Vec::new();
            for path in files {
                let doc = load_document(&path).await?;
                if doc.get("tag").and_then(Value::as_str) == Some(tag) {
                    matched.push((path, Some(doc)));
                }
            }
            debug!(tag, matched = matched.len(), "Filtered seed documents");
            if matched.is_empty() {
                return Err(StoreError::NotFound {
                    path: pattern,
                });
            }
            matched
        }
    };

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let chosen: Vec<&(PathBuf, Option<Value>)> = candidates
        .choose_multiple(&mut rng, size.min(candidates.len()))
        .collect();

    let mut documents = Vec::with_capacity(chosen.len());
    for (path, loaded) in chosen {
        let doc = match loaded {
            Some(doc) => doc.clone(),
            None => load_document(path).await?,
        };
        documents.push(doc);
    }
    Ok(documents)
}

// ============================================================================
// Formulation and bundling
// ============================================================================

pub struct FormulaStage {
    pub temperature: f32,
}

#[async_trait]
impl Stage for FormulaStage {
    fn name(&self) -> &str {
        "formula"
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let key = require_lineage(ctx)?;
        let concept = render_yaml(require_document(ctx, ArtifactKind::Concept.context_key())?)?;
        let concept_path = require_path(ctx, &ArtifactKind::Concept.path_key())?;

        let raw = generate(
            env,
            self.name(),
            prompts::FORMULA_SYSTEM,
            &prompts::formula_user(&concept),
            self.temperature,
        )
        .await?;

        let mut doc = parse_document(&raw)?;
        if doc.get("alpha_formula").is_none() {
            return Err(StageError::invalid("formula has no alpha_formula"));
        }
        set_meta(&mut doc, "concept_file", Value::from(file_name(concept_path)));

        persist(env, ArtifactKind::Formula, key, Payload::Document(doc)).await
    }
}

/// Concept and formula concatenated, no generation
pub struct BundleStage;

#[async_trait]
impl Stage for BundleStage {
    fn name(&self) -> &str {
        "bundle"
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let key = require_lineage(ctx)?;
        let concept = require_document(ctx, ArtifactKind::Concept.context_key())?;
        let formula = require_document(ctx, ArtifactKind::Formula.context_key())?;
        let concept_path = require_path(ctx, &ArtifactKind::Concept.path_key())?;
        let formula_path = require_path(ctx, &ArtifactKind::Formula.path_key())?;

        let meta_focus = |doc: &Value| {
            doc.get("meta")
                .and_then(|m| m.get("focus"))
                .filter(|f| !f.is_null())
                .cloned()
        };
        let focus = meta_focus(formula)
            .or_else(|| meta_focus(concept))
            .or_else(|| ctx.text(FOCUS).map(Value::from))
            .unwrap_or(Value::Null);

        let mut meta = Mapping::new();
        meta.insert("combined_at".into(), env.lineage.now().format("%Y-%m-%dT%H:%M:%S").to_string().into());
        meta.insert("concept_file".into(), file_name(concept_path).into());
        meta.insert("formula_file".into(), file_name(formula_path).into());
        meta.insert("focus".into(), focus);
        meta.insert("notes".into(), "concept + formula concatenated".into());

        let mut bundle = Mapping::new();
        bundle.insert(
            "alpha_concept".into(),
            concept.get("alpha_concept").cloned().unwrap_or(Value::Mapping(Mapping::new())),
        );
        bundle.insert(
            "alpha_formula".into(),
            formula.get("alpha_formula").cloned().unwrap_or(Value::Mapping(Mapping::new())),
        );
        bundle.insert("meta".into(), Value::Mapping(meta));

        persist(env, ArtifactKind::Bundle, key, Payload::Document(Value::Mapping(bundle))).await
    }
}

// ============================================================================
// Code generation and refinement
// ============================================================================

/// Code from an upstream document
pub struct CodeStage {
    pub from: ArtifactKind,
    pub temperature: f32,
}

#[async_trait]
impl Stage for CodeStage {
    fn name(&self) -> &str {
        "code"
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let key = require_lineage(ctx)?;
        let spec = upstream_text(ctx, self.from)?;
        let system = if self.from == ArtifactKind::Idea {
            prompts::FEATURE_CODE_SYSTEM
        } else {
            prompts::ALPHA_CODE_SYSTEM
        };

        let raw = generate(env, self.name(), system, &prompts::code_user(&spec), self.temperature).await?;
        let code = extract_fence(&raw);
        if !code.contains("def ") {
            return Err(StageError::invalid("no function definition in generated code"));
        }

        persist(env, ArtifactKind::Code, key, Payload::Text(format!("{}\n", code))).await
    }
}

/// Regenerates the code, then gates it through the hygiene pass
pub struct RefineStage {
    pub temperature: f32,
}

#[async_trait]
impl Stage for RefineStage {
    fn name(&self) -> &str {
        "refine"
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let key = require_lineage(ctx)?;
        let code = require_text(ctx, ArtifactKind::Code.context_key())?;

        let raw = generate(
            env,
            self.name(),
            prompts::REFINE_SYSTEM,
            &prompts::refine_user(code),
            self.temperature,
        )
        .await?;

        let cleaned = env
            .hygiene
            .inspect(&raw)
            .map_err(|e| StageError::GenerationInvalid(e.to_string()))?;
        if !cleaned.findings.is_empty() {
            info!(
                lineage_key = key,
                dead_helpers = ?cleaned.findings.dead_helpers,
                removed_imports = ?cleaned.findings.removed_imports,
                added_imports = ?cleaned.findings.added_imports,
                unused_parameters = ?cleaned.findings.unused_parameters,
                "Hygiene findings"
            );
        }

        persist(env, ArtifactKind::CodeRefined, key, Payload::Text(cleaned.code)).await
    }
}

// ============================================================================
// Explanation
// ============================================================================

/// Markdown explanation of an upstream artifact
pub struct ExplainStage {
    pub from: ArtifactKind,
    /// `explanation` or `report`
    pub output: ArtifactKind,
    pub temperature: f32,
}

#[async_trait]
impl Stage for ExplainStage {
    fn name(&self) -> &str {
        self.output.as_str()
    }

    async fn run(&self, env: &StageEnv, ctx: &PipelineContext) -> Result<ContextUpdate, StageError> {
        let key = require_lineage(ctx)?;
        let content = upstream_text(ctx, self.from)?;

        let (system, user) = if self.output == ArtifactKind::Report {
            (prompts::REPORT_SYSTEM, prompts::report_user(&content))
        } else {
            (prompts::EXPLAIN_SYSTEM, prompts::explain_user(&content))
        };
        let raw = generate(env, self.name(), system, &user, self.temperature).await?;

        let text = ANY_FENCE.replace_all(&raw, "");
        let text = text.trim();
        if text.chars().count() < MIN_EXPLANATION_CHARS {
            return Err(StageError::invalid(format!(
                "explanation shorter than {} characters",
                MIN_EXPLANATION_CHARS
            )));
        }

        persist(env, self.output, key, Payload::Text(format!("{}\n", text))).await
    }
}
