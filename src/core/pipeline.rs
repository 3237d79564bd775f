//! Pipeline definitions and loading.
//!
//! Pipelines are defined in YAML as an ordered list of stages. Each stage
//! names an action and, where it reads an upstream artifact, which kind.
//! Three pipelines are built in: `alpha`, `feature` and `report`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::stages::{
    BundleStage, CodeStage, ConceptStage, ExplainStage, FormulaStage, IdeaStage, RefineStage, Stage,
};
use crate::domain::context::{FOCUS, LINEAGE_KEY, SEED_DOCUMENTS};
use crate::domain::ArtifactKind;

const ALPHA_PIPELINE_YAML: &str = r#"
name: alpha
description: Seed documents -> concept -> formula -> bundle -> code -> refined code
stages:
  - action: concept
  - action: formula
  - action: bundle
  - action: code
    from: bundle
  - action: refine
"#;

const FEATURE_PIPELINE_YAML: &str = r#"
name: feature
description: Idea -> code -> refined code -> explanation
stages:
  - action: idea
  - action: code
    from: idea
  - action: refine
  - action: explain
    from: code_refined
"#;

const REPORT_PIPELINE_YAML: &str = r#"
name: report
description: Seed documents -> concept -> formula -> bundle -> Markdown report
stages:
  - action: concept
  - action: formula
  - action: bundle
  - action: report
    from: bundle
"#;

/// Context keys a run may be seeded with
pub const PIPELINE_INPUTS: [&str; 2] = [FOCUS, SEED_DOCUMENTS];

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name (used in CLI)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Ordered list of stages to execute
    pub stages: Vec<StageSpec>,
}

impl Pipeline {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    pub fn builtin_names() -> [&'static str; 3] {
        ["alpha", "feature", "report"]
    }

    pub fn builtin(name: &str) -> Option<Self> {
        let yaml = match name {
            "alpha" => ALPHA_PIPELINE_YAML,
            "feature" => FEATURE_PIPELINE_YAML,
            "report" => REPORT_PIPELINE_YAML,
            _ => return None,
        };
        Self::from_yaml(yaml).ok()
    }

    /// `<dir>/<name>.yaml` if present, otherwise a built-in
    pub fn resolve(name: &str, dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = dir {
            let path = dir.join(format!("{}.yaml", name));
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Self::builtin(name).with_context(|| format!("Pipeline not found: {}", name))
    }

    /// Validate ordering and uniqueness.
    ///
    /// `inputs` are the context keys supplied before the first stage runs.
    pub fn validate(&self, inputs: &[&str]) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        if self.stages.is_empty() {
            anyhow::bail!("Pipeline must have at least one stage");
        }

        if !self.stages[0].creates_lineage() {
            anyhow::bail!(
                "First stage '{}' must create the lineage key (idea or concept)",
                self.stages[0].name()
            );
        }

        // Which stage index first produces each key
        let mut producers: HashMap<String, usize> = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            for key in stage.produces_keys() {
                if let Some(&earlier) = producers.get(&key) {
                    anyhow::bail!(
                        "Stages '{}' and '{}' both produce '{}'",
                        self.stages[earlier].name(),
                        stage.name(),
                        key
                    );
                }
                producers.insert(key, i);
            }
        }

        let mut names = BTreeSet::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if !names.insert(stage.name()) {
                anyhow::bail!("Duplicate stage name '{}'", stage.name());
            }

            if let (Action::Code, Some(from)) = (stage.action, stage.from) {
                if !from.is_document() {
                    anyhow::bail!("Stage '{}' cannot generate code from '{}'", stage.name(), from);
                }
            }

            for key in stage.requires() {
                if inputs.contains(&key.as_str()) {
                    continue;
                }
                match producers.get(&key) {
                    Some(&p) if p < i => {}
                    Some(&p) => anyhow::bail!(
                        "Stage '{}' requires '{}' from later stage '{}' (forward references not allowed)",
                        stage.name(),
                        key,
                        self.stages[p].name()
                    ),
                    None => anyhow::bail!(
                        "Stage '{}' requires '{}' which no earlier stage produces",
                        stage.name(),
                        key
                    ),
                }
            }
        }

        Ok(())
    }
}

/// What a stage does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Idea,
    Concept,
    Formula,
    Bundle,
    Code,
    Refine,
    Explain,
    Report,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Idea => "idea",
            Action::Concept => "concept",
            Action::Formula => "formula",
            Action::Bundle => "bundle",
            Action::Code => "code",
            Action::Refine => "refine",
            Action::Explain => "explain",
            Action::Report => "report",
        }
    }

    pub fn produces(self) -> ArtifactKind {
        match self {
            Action::Idea => ArtifactKind::Idea,
            Action::Concept => ArtifactKind::Concept,
            Action::Formula => ArtifactKind::Formula,
            Action::Bundle => ArtifactKind::Bundle,
            Action::Code => ArtifactKind::Code,
            Action::Refine => ArtifactKind::CodeRefined,
            Action::Explain => ArtifactKind::Explanation,
            Action::Report => ArtifactKind::Report,
        }
    }

    pub fn default_temperature(self) -> f32 {
        match self {
            Action::Idea => 0.75,
            Action::Concept => 0.7,
            Action::Formula | Action::Code => 0.35,
            Action::Bundle | Action::Refine | Action::Explain | Action::Report => 0.2,
        }
    }

    /// Upstream kind read when `from` is not given
    fn default_source(self) -> Option<ArtifactKind> {
        match self {
            Action::Code => Some(ArtifactKind::Formula),
            Action::Explain | Action::Report => Some(ArtifactKind::CodeRefined),
            _ => None,
        }
    }
}

/// A single stage in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name (defaults to the action)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub action: Action,

    /// Upstream artifact kind (code, explain, report)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ArtifactKind>,

    /// Override the action's default temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl StageSpec {
    pub fn new(action: Action) -> Self {
        Self {
            name: None,
            action,
            from: None,
            temperature: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.action.as_str())
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(self.action.default_temperature())
    }

    pub fn source(&self) -> Option<ArtifactKind> {
        self.from.or(self.action.default_source())
    }

    pub fn creates_lineage(&self) -> bool {
        matches!(self.action, Action::Idea | Action::Concept)
    }

    pub fn produces(&self) -> ArtifactKind {
        self.action.produces()
    }

    /// Context keys this stage adds
    pub fn produces_keys(&self) -> Vec<String> {
        let kind = self.produces();
        let mut keys = vec![kind.context_key().to_string(), kind.path_key()];
        if self.creates_lineage() {
            keys.push(LINEAGE_KEY.to_string());
        }
        keys
    }

    /// Context keys this stage reads
    pub fn requires(&self) -> Vec<String> {
        let lineage = LINEAGE_KEY.to_string();
        let concept = ArtifactKind::Concept;
        let formula = ArtifactKind::Formula;
        match self.action {
            Action::Idea => Vec::new(),
            Action::Concept => vec![SEED_DOCUMENTS.to_string()],
            Action::Formula => vec![lineage, concept.context_key().to_string(), concept.path_key()],
            Action::Bundle => vec![
                lineage,
                concept.context_key().to_string(),
                concept.path_key(),
                formula.context_key().to_string(),
                formula.path_key(),
            ],
            Action::Refine => vec![lineage, ArtifactKind::Code.context_key().to_string()],
            Action::Code | Action::Explain | Action::Report => {
                let mut keys = vec![lineage];
                keys.extend(self.source().map(|k| k.context_key().to_string()));
                keys
            }
        }
    }

    /// Instantiate the stage
    pub fn build(&self) -> Box<dyn Stage> {
        let temperature = self.temperature();
        let source = self.source().unwrap_or(ArtifactKind::Formula);
        match self.action {
            Action::Idea => Box::new(IdeaStage { temperature }),
            Action::Concept => Box::new(ConceptStage { temperature }),
            Action::Formula => Box::new(FormulaStage { temperature }),
            Action::Bundle => Box::new(BundleStage),
            Action::Code => Box::new(CodeStage {
                from: source,
                temperature,
            }),
            Action::Refine => Box::new(RefineStage { temperature }),
            Action::Explain | Action::Report => Box::new(ExplainStage {
                from: source,
                output: self.produces(),
                temperature,
            }),
        }
    }
}
