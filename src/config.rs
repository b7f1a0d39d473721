use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::extract::SourceFormat;
use crate::models::FindingKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub detectors: DetectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl IngestConfig {
    /// Format for `filename` if its extension is on the allow-list.
    pub fn accepted_format(&self, filename: &str) -> Option<SourceFormat> {
        let (_, ext) = filename.rsplit_once('.')?;
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            .then(|| SourceFormat::from_extension(ext))
            .flatten()
    }
}

fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    SourceFormat::ALL_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_detector_timeout_ms")]
    pub detector_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_required_kinds")]
    pub required_kinds: Vec<FindingKind>,
    /// How long a finished job stays in memory after it has been stored.
    #[serde(default = "default_retain_finished_ms")]
    pub retain_finished_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            detector_timeout_ms: default_detector_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            required_kinds: default_required_kinds(),
            retain_finished_ms: default_retain_finished_ms(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    4
}
fn default_detector_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_required_kinds() -> Vec<FindingKind> {
    vec![FindingKind::Plagiarism, FindingKind::AiGenerated]
}
fn default_retain_finished_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DetectorsConfig {
    #[serde(default)]
    pub http: BTreeMap<String, HttpDetectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpDetectorConfig {
    pub url: String,
    pub kind: FindingKind,
    /// Name of an environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Config {
    /// Configuration with every default and an in-memory-friendly database path.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/vtx.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:7340".to_string(),
            },
            ingest: IngestConfig::default(),
            pipeline: PipelineConfig::default(),
            detectors: DetectorsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ingest.max_bytes == 0 {
        anyhow::bail!("ingest.max_bytes must be > 0");
    }
    if config.ingest.allowed_extensions.is_empty() {
        anyhow::bail!("ingest.allowed_extensions must not be empty");
    }
    for ext in &config.ingest.allowed_extensions {
        if SourceFormat::from_extension(ext).is_none() {
            anyhow::bail!(
                "Unsupported extension in ingest.allowed_extensions: '{}'. Must be one of: {}",
                ext,
                SourceFormat::ALL_EXTENSIONS.join(", ")
            );
        }
    }

    if config.pipeline.max_concurrent_jobs == 0 {
        anyhow::bail!("pipeline.max_concurrent_jobs must be >= 1");
    }
    if config.pipeline.detector_timeout_ms == 0 {
        anyhow::bail!("pipeline.detector_timeout_ms must be > 0");
    }

    for (name, detector) in &config.detectors.http {
        if !(detector.url.starts_with("http://") || detector.url.starts_with("https://")) {
            anyhow::bail!(
                "detectors.http.{}.url must be an http(s) URL, got '{}'",
                name,
                detector.url
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const BASE: &str = r#"
[db]
path = "./data/vtx.sqlite"

[server]
bind = "127.0.0.1:7340"
"#;

    #[test]
    fn defaults_apply() {
        let config = parse(BASE).unwrap();
        assert_eq!(config.ingest.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.ingest.allowed_extensions, vec!["txt", "pdf", "docx"]);
        assert_eq!(config.pipeline.max_retries, 2);
        assert_eq!(config.pipeline.max_concurrent_jobs, 4);
        assert_eq!(
            config.pipeline.required_kinds,
            vec![FindingKind::Plagiarism, FindingKind::AiGenerated]
        );
        assert!(config.detectors.http.is_empty());
    }

    #[test]
    fn http_detectors_parse() {
        let config = parse(&format!(
            r#"{}
[pipeline]
required_kinds = ["ai_generated"]
detector_timeout_ms = 1500

[detectors.http.originality]
url = "https://detect.example.com/v1/plagiarism"
kind = "plagiarism"
api_key_env = "ORIGINALITY_KEY"

[detectors.http.classifier]
url = "http://localhost:9000/classify"
kind = "ai_generated"
"#,
            BASE
        ))
        .unwrap();
        assert_eq!(config.pipeline.required_kinds, vec![FindingKind::AiGenerated]);
        assert_eq!(config.pipeline.detector_timeout_ms, 1500);
        let names: Vec<_> = config.detectors.http.keys().cloned().collect();
        assert_eq!(names, vec!["classifier", "originality"]);
        assert_eq!(
            config.detectors.http["originality"].api_key_env.as_deref(),
            Some("ORIGINALITY_KEY")
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse(&format!(
            "{}\n[ingest]\nallowed_extensions = [\"txt\", \"rtf\"]\n",
            BASE
        ))
        .unwrap_err();
        assert!(err.to_string().contains("rtf"));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = parse(&format!(
            "{}\n[pipeline]\nmax_concurrent_jobs = 0\n",
            BASE
        ))
        .unwrap_err();
        assert!(err.to_string().contains("max_concurrent_jobs"));
    }

    #[test]
    fn accepted_format_honours_allow_list() {
        let ingest = IngestConfig {
            max_bytes: 100,
            allowed_extensions: vec!["txt".to_string(), "docx".to_string()],
        };
        assert_eq!(
            ingest.accepted_format("Thesis.DOCX"),
            Some(SourceFormat::Docx)
        );
        assert_eq!(ingest.accepted_format("paper.pdf"), None);
        assert_eq!(ingest.accepted_format("noext"), None);
    }
}
