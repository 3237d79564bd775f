//! Configuration for alphaforge.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ALPHAFORGE_ROOT, ALPHAFORGE_CONFIG)
//! 2. Config file (.alphaforge/config.yaml)
//! 3. Defaults (./outputs, Groq chat backend, built-in hygiene rules)
//!
//! Config file discovery:
//! - `ALPHAFORGE_CONFIG` names the file explicitly
//! - otherwise searches current directory and parents for .alphaforge/config.yaml
//! - Paths in config file are relative to the project root (parent of .alphaforge/)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{build_generator, GeneratorConfig};
use crate::core::{ArtifactStore, Journal, Runner, StageEnv};
use crate::domain::{ClockSource, CollisionPolicy, LineageKeyGenerator};
use crate::hygiene::{HygieneConfig, HygieneEngine};

pub const CONFIG_DIR: &str = ".alphaforge";
pub const CONFIG_FILE: &str = "config.yaml";
pub const ENV_CONFIG: &str = "ALPHAFORGE_CONFIG";
pub const ENV_ROOT: &str = "ALPHAFORGE_ROOT";
const DEFAULT_ROOT: &str = "outputs";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Artifact and journal root
    pub root: Option<String>,
    /// Directory of user pipeline definitions
    pub pipelines_dir: Option<String>,
    #[serde(default)]
    pub lineage: LineageConfig,
    #[serde(default)]
    pub hygiene: HygieneConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub concept: ConceptConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageConfig {
    #[serde(default)]
    pub clock: ClockSource,
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptConfig {
    /// Directory of seed `*.yaml` documents
    pub input_dir: Option<String>,
    #[serde(default = "default_subset_size")]
    pub subset_size: usize,
    /// Only sample documents whose `tag` field matches
    pub tag: Option<String>,
    pub seed: Option<u64>,
}

fn default_subset_size() -> usize {
    8
}

impl Default for ConceptConfig {
    fn default() -> Self {
        Self {
            input_dir: None,
            subset_size: default_subset_size(),
            tag: None,
            seed: None,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Artifact store and journal root
    pub root: PathBuf,
    pub pipelines_dir: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub lineage: LineageConfig,
    pub hygiene: HygieneConfig,
    pub generator: GeneratorConfig,
    pub concept: ConceptSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConceptSettings {
    pub input_dir: Option<PathBuf>,
    pub subset_size: usize,
    pub tag: Option<String>,
    pub seed: Option<u64>,
}

impl ResolvedConfig {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;

        let config_file = match std::env::var(ENV_CONFIG) {
            Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => find_config_file(&cwd),
        };
        let root_override = std::env::var(ENV_ROOT)
            .ok()
            .filter(|r| !r.is_empty())
            .map(PathBuf::from);

        Self::load_from(config_file, root_override, &cwd)
    }

    /// Load from an explicit (optional) config file
    pub fn load_from(config_file: Option<PathBuf>, root_override: Option<PathBuf>, cwd: &Path) -> Result<Self> {
        match config_file {
            Some(path) => {
                let file = load_config_file(&path)?;
                // Project root is the parent of .alphaforge/
                let base_dir = path
                    .parent()
                    .and_then(|p| p.parent())
                    .unwrap_or(cwd)
                    .to_path_buf();
                Ok(Self::resolve(file, Some(path), root_override, &base_dir))
            }
            None => Ok(Self::resolve(ConfigFile::default(), None, root_override, cwd)),
        }
    }

    fn resolve(file: ConfigFile, config_file: Option<PathBuf>, root_override: Option<PathBuf>, base: &Path) -> Self {
        let root = match (root_override, file.root.as_deref()) {
            (Some(root), _) => root,
            (None, Some(root)) => resolve_path(base, root),
            (None, None) => base.join(DEFAULT_ROOT),
        };

        Self {
            root,
            pipelines_dir: file.pipelines_dir.as_deref().map(|p| resolve_path(base, p)),
            config_file,
            lineage: file.lineage,
            hygiene: file.hygiene,
            generator: file.generator,
            concept: ConceptSettings {
                input_dir: file.concept.input_dir.as_deref().map(|p| resolve_path(base, p)),
                subset_size: file.concept.subset_size,
                tag: file.concept.tag,
                seed: file.concept.seed,
            },
        }
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.root)
    }

    pub fn journal(&self) -> Journal {
        Journal::new(&self.root)
    }

    pub fn lineage_generator(&self) -> LineageKeyGenerator {
        LineageKeyGenerator::new(self.lineage.clock.clock(), self.lineage.on_collision)
    }

    pub fn hygiene_engine(&self) -> HygieneEngine {
        HygieneEngine::new(self.hygiene.clone())
    }

    /// Stage environment with the configured generator backend
    pub fn stage_env(&self) -> Result<StageEnv> {
        let generator = build_generator(&self.generator).context("Failed to initialize generator")?;
        Ok(StageEnv {
            generator,
            store: self.store(),
            hygiene: self.hygiene_engine(),
            lineage: self.lineage_generator(),
        })
    }

    pub fn runner(&self) -> Result<Runner> {
        Ok(Runner::new(self.stage_env()?, self.journal()))
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be home-relative or relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CommandConfig;
    use crate::hygiene::ImportPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let cwd = PathBuf::from("/work/project");
        let config = ResolvedConfig::load_from(None, None, &cwd).unwrap();

        assert_eq!(config.root, PathBuf::from("/work/project/outputs"));
        assert!(config.config_file.is_none());
        assert_eq!(config.concept.subset_size, 8);
        assert_eq!(config.lineage.on_collision, CollisionPolicy::Accept);
        assert_eq!(config.hygiene, HygieneConfig::default());
        assert_eq!(config.generator, GeneratorConfig::default());
    }

    #[test]
    fn test_root_override_wins() {
        let cwd = PathBuf::from("/work/project");
        let config = ResolvedConfig::load_from(None, Some(PathBuf::from("/data/af")), &cwd).unwrap();
        assert_eq!(config.root, PathBuf::from("/data/af"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join(CONFIG_FILE);
        std::fs::write(
            &config_path,
            r#"
root: ./artifacts
pipelines_dir: pipelines
lineage:
  clock: utc
  on_collision: suffix
hygiene:
  banned_tokens: ["future_", "lookahead_"]
  helpers: [sma, zscore]
generator:
  backend: command
  program: fabric
  args: ["-p", "{stage}"]
concept:
  input_dir: data/relationships
  subset_size: 4
  tag: volatility
  seed: 42
"#,
        )
        .unwrap();

        let config = ResolvedConfig::load_from(Some(config_path.clone()), None, Path::new("/elsewhere")).unwrap();

        assert_eq!(config.root, temp.path().join("./artifacts"));
        assert_eq!(config.pipelines_dir, Some(temp.path().join("pipelines")));
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.lineage.clock, ClockSource::Utc);
        assert_eq!(config.lineage_generator().policy(), CollisionPolicy::Suffix);
        assert_eq!(config.hygiene.banned_tokens, vec!["future_", "lookahead_"]);
        assert_eq!(config.hygiene.helpers, vec!["sma", "zscore"]);
        // Unspecified hygiene fields keep their defaults
        assert_eq!(config.hygiene.primary_type, "pd.DataFrame");
        assert_eq!(config.hygiene.imports[0].policy, ImportPolicy::Mandatory);
        assert_eq!(
            config.generator,
            GeneratorConfig::Command(CommandConfig {
                program: "fabric".to_string(),
                args: vec!["-p".to_string(), "{stage}".to_string()],
            })
        );
        assert_eq!(config.concept.input_dir, Some(temp.path().join("data/relationships")));
        assert_eq!(config.concept.subset_size, 4);
        assert_eq!(config.concept.tag.as_deref(), Some("volatility"));
        assert_eq!(config.concept.seed, Some(42));
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CONFIG_FILE), "root: out\n").unwrap();

        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(config_dir.join(CONFIG_FILE)));
    }

    #[test]
    fn test_invalid_config_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "lineage: [not, a, mapping]\n").unwrap();

        assert!(ResolvedConfig::load_from(Some(path), None, temp.path()).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(resolve_path(&base, "./subdir"), PathBuf::from("/home/user/project/./subdir"));
        assert_eq!(resolve_path(&base, "/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
