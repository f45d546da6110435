//! Configuration for the scorecard.
//!
//! Values come from built-in defaults, then an optional YAML file, then
//! environment variables. Every file section is optional and every field
//! inside a section falls back to its default.

use crate::aggregate::{DimensionWeights, WeightConfig};
use crate::error::{Result, ScorecardError};
use crate::judge::Dimension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Chat endpoint used for the automated judge call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL, e.g. "https://api.openai.com"
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Keep at 0 so repeated judging is as stable as the model allows.
    pub temperature: f32,
    /// Upper bound for a single judge call, in seconds.
    pub timeout_secs: u64,
    /// Ask the server for a JSON object response. Not every server supports it.
    pub json_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            timeout_secs: 120,
            json_mode: false,
        }
    }
}

/// Which embedding backend feeds the semantic layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Semantic layer disabled.
    #[default]
    None,
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Http,
    /// Local sentence-transformer (requires the `local-embeddings` feature).
    Local,
    /// Deterministic hashed bag-of-tokens vectors (offline runs, tests).
    Hash,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Ok(Self::None),
            "http" => Ok(Self::Http),
            "local" => Ok(Self::Local),
            "hash" => Ok(Self::Hash),
            other => Err(format!("unknown embedding backend '{}'", other)),
        }
    }
}

/// Embedding configuration for the semantic layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Vector size for the hash backend.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::None,
            api_base: String::new(),
            api_key: String::new(),
            model: "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            timeout_secs: 30,
            dimension: 256,
        }
    }
}

/// Scoring knobs: weights, term tables, and validator tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Layer weights. `None` picks the default split for the active layers.
    pub layer_weights: Option<WeightConfig>,
    /// Judge dimensions folded into the recomputed judge overall.
    pub judge_dimensions: Vec<Dimension>,
    /// Per-dimension weights for the judge overall.
    pub dimension_weights: DimensionWeights,
    /// Terms added to the built-in gazetteer.
    pub extra_gazetteer: Vec<String>,
    /// Synonym families added to the built-in table.
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// Replaces the built-in explanatory connectives when non-empty.
    pub explanatory_connectives: Vec<String>,
    /// Allowed gap between the judge overall and the dimension mean.
    pub overall_tolerance: f64,
    /// Warn on judge records without a question_id or without their
    /// dimension-specific metrics.
    pub strict_validation: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            layer_weights: None,
            judge_dimensions: Dimension::ALL.to_vec(),
            dimension_weights: DimensionWeights::equal(),
            extra_gazetteer: Vec::new(),
            synonyms: BTreeMap::new(),
            explanatory_connectives: Vec::new(),
            overall_tolerance: 2.0,
            strict_validation: false,
        }
    }
}

/// Ledger location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub dir: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub scoring: ScoringConfig,
    pub ledger: LedgerConfig,
}

/// Parse `name` from the environment into `target`; unparsable values are ignored.
fn env_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T) -> bool {
    match lookup(name).and_then(|raw| raw.trim().parse().ok()) {
        Some(value) => {
            *target = value;
            true
        }
        None => false,
    }
}

impl Config {
    /// Load configuration from the default file (if present) and the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, ...)
    /// 2. Config file (~/.config/rag-scorecard/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        match Self::config_file_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => {
                let mut config = Self::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    /// Load from a specific file, then apply the environment.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ScorecardError::io(path, e))?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from YAML text. Absent sections keep their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| ScorecardError::Config(format!("Failed to parse config file: {}", e)))
    }

    fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let llm = &mut self.llm;
        env_override(&lookup, "LLM_API_BASE", &mut llm.api_base);
        env_override(&lookup, "LLM_API_KEY", &mut llm.api_key);
        env_override(&lookup, "LLM_MODEL", &mut llm.model);
        env_override(&lookup, "LLM_MAX_TOKENS", &mut llm.max_tokens);
        env_override(&lookup, "LLM_TEMPERATURE", &mut llm.temperature);
        env_override(&lookup, "LLM_TIMEOUT_SECS", &mut llm.timeout_secs);
        env_override(&lookup, "LLM_JSON_MODE", &mut llm.json_mode);

        let embedding = &mut self.embedding;
        let explicit_backend = env_override(&lookup, "EMBEDDING_BACKEND", &mut embedding.backend);
        if env_override(&lookup, "EMBEDDING_API_BASE", &mut embedding.api_base)
            && !explicit_backend
            && embedding.backend == EmbeddingBackend::None
        {
            embedding.backend = EmbeddingBackend::Http;
        }
        env_override(&lookup, "EMBEDDING_API_KEY", &mut embedding.api_key);
        env_override(&lookup, "EMBEDDING_MODEL", &mut embedding.model);

        env_override(&lookup, "SCORECARD_LEDGER_DIR", &mut self.ledger.dir);
    }

    /// Default config file location.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rag-scorecard")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Check that the automated judge has an endpoint to call.
    pub fn validate_llm(&self) -> Result<()> {
        let missing = [
            ("API base URL", "LLM_API_BASE", &self.llm.api_base),
            ("API key", "LLM_API_KEY", &self.llm.api_key),
            ("model", "LLM_MODEL", &self.llm.model),
        ]
        .into_iter()
        .find(|(_, _, value)| value.trim().is_empty());

        match missing {
            Some((what, var, _)) => Err(ScorecardError::Config(format!(
                "LLM {} is required. Set {} or add it to the config file.",
                what, var
            ))),
            None => Ok(()),
        }
    }

    /// Validate settings that every run depends on.
    pub fn validate(&self) -> Result<()> {
        if let Some(weights) = &self.scoring.layer_weights {
            weights.check()?;
        }
        self.scoring.dimension_weights.check()?;

        let tolerance = self.scoring.overall_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ScorecardError::Config(format!(
                "overall_tolerance must be non-negative, got {}",
                tolerance
            )));
        }

        match self.embedding.backend {
            EmbeddingBackend::Http if self.embedding.api_base.trim().is_empty() => {
                Err(ScorecardError::Config(
                    "Embedding API base URL is required for the http backend. Set EMBEDDING_API_BASE."
                        .to_string(),
                ))
            }
            EmbeddingBackend::Hash if self.embedding.dimension == 0 => Err(ScorecardError::Config(
                "Hash embedding dimension must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Config with only the judge endpoint set (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.llm.api_base.is_empty());
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.llm.timeout_secs, 120);
        assert!(!config.llm.json_mode);
        assert_eq!(config.embedding.backend, EmbeddingBackend::None);
        assert_eq!(config.scoring.judge_dimensions.len(), 4);
        assert_eq!(config.scoring.overall_tolerance, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_llm_names_the_missing_setting() {
        let err = Config::default().validate_llm().unwrap_err();
        assert!(err.to_string().contains("LLM_API_BASE"));

        let mut config = Config::with_llm("https://api.example.com", "", "gpt-4");
        assert!(config.validate_llm().unwrap_err().to_string().contains("LLM_API_KEY"));
        config.llm.api_key = "key".to_string();
        assert!(config.validate_llm().is_ok());
    }

    #[test]
    fn test_from_yaml_sections() {
        let yaml = r#"
llm:
  model: judge-model
  timeout_secs: 10
embedding:
  backend: hash
  dimension: 64
scoring:
  layer_weights:
    keyword: 0.2
    semantic: 0.3
    judge: 0.5
  judge_dimensions: [relevance, faithfulness]
  synonyms:
    contractor: [vendor, subcontractor]
  overall_tolerance: 0.1
ledger:
  dir: /tmp/ledger
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.model, "judge-model");
        assert_eq!(config.llm.timeout_secs, 10);
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Hash);
        assert_eq!(config.embedding.dimension, 64);
        let weights = config.scoring.layer_weights.clone().unwrap();
        assert_eq!(weights.judge, 0.5);
        assert_eq!(
            config.scoring.judge_dimensions,
            vec![Dimension::Relevance, Dimension::ScopeAdherence]
        );
        assert_eq!(config.scoring.synonyms["contractor"].len(), 2);
        assert_eq!(config.ledger.dir, PathBuf::from("/tmp/ledger"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = Config::from_yaml("  \n").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(Config::from_yaml("llm: [not, a, map]").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_yaml("llm:\n  model: from-file\n").unwrap();
        config.apply_env_from(env(&[
            ("LLM_MODEL", "from-env"),
            ("LLM_MAX_TOKENS", "not-a-number"),
            ("LLM_JSON_MODE", "true"),
            ("SCORECARD_LEDGER_DIR", "/var/ledger"),
        ]));

        assert_eq!(config.llm.model, "from-env");
        assert_eq!(config.llm.max_tokens, 4096);
        assert!(config.llm.json_mode);
        assert_eq!(config.ledger.dir, PathBuf::from("/var/ledger"));
    }

    #[test]
    fn test_embedding_base_enables_http_backend() {
        let mut config = Config::default();
        config.apply_env_from(env(&[("EMBEDDING_API_BASE", "http://localhost:8080")]));
        assert_eq!(config.embedding.backend, EmbeddingBackend::Http);

        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("EMBEDDING_API_BASE", "http://localhost:8080"),
            ("EMBEDDING_BACKEND", "none"),
        ]));
        assert_eq!(config.embedding.backend, EmbeddingBackend::None);
    }

    #[test]
    fn test_validate_rejects_http_backend_without_base() {
        let mut config = Config::default();
        config.embedding.backend = EmbeddingBackend::Http;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_numbers() {
        let mut config = Config::default();
        config.scoring.layer_weights = Some(WeightConfig::new(-1.0, 0.5, 0.5));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.overall_tolerance = f64::NAN;
        assert!(config.validate().is_err());
    }
}
