//! Configuration for the deck pipeline
//!
//! Loaded from `~/.deck/config.toml` (or an explicit path) with every field
//! defaulted, then overlaid with environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::retry::{RetryOverrides, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeckConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub style: StyleConfig,

    #[serde(default)]
    pub parsing: ParsingConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Which HTTP dialect the completion endpoint speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmFlavor {
    #[default]
    OpenAI,
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub flavor: LlmFlavor,

    /// Full chat-completions URL for OpenAI, resource URL for Azure
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model name (OpenAI) or deployment name (Azure)
    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_azure_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_azure_api_version() -> String {
    "2024-10-21".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            flavor: LlmFlavor::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_version: default_azure_api_version(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Content slides generated concurrently within one request
    #[serde(default = "default_parallel_slides")]
    pub parallel_slides: usize,

    /// Generative calls in flight across all requests
    #[serde(default = "default_global_generation_permits")]
    pub global_permits: usize,

    #[serde(default = "default_generation_retry", deserialize_with = "generation_retry")]
    pub retry: RetryPolicy,
}

fn default_parallel_slides() -> usize {
    4
}

fn default_global_generation_permits() -> usize {
    8
}

fn default_generation_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8))
}

fn generation_retry<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RetryPolicy, D::Error> {
    RetryOverrides::deserialize(deserializer).map(|o| o.apply(default_generation_retry()))
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            parallel_slides: default_parallel_slides(),
            global_permits: default_global_generation_permits(),
            retry: default_generation_retry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments passed to `program`; run with the workspace as cwd
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra environment for the subprocess (e.g. `NODE_PATH`)
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_conversion_timeout_secs")]
    pub timeout_secs: u64,

    /// Conversion subprocesses alive across all requests
    #[serde(default = "default_global_conversion_permits")]
    pub global_permits: usize,

    #[serde(default = "default_conversion_retry", deserialize_with = "conversion_retry")]
    pub retry: RetryPolicy,
}

fn default_program() -> String {
    "node".to_string()
}

fn default_args() -> Vec<String> {
    vec!["build.js".to_string()]
}

fn default_conversion_timeout_secs() -> u64 {
    180
}

fn default_global_conversion_permits() -> usize {
    2
}

fn default_conversion_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(250), Duration::from_secs(2))
}

fn conversion_retry<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RetryPolicy, D::Error> {
    RetryOverrides::deserialize(deserializer).map(|o| o.apply(default_conversion_retry()))
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            env: BTreeMap::new(),
            timeout_secs: default_conversion_timeout_secs(),
            global_permits: default_global_conversion_permits(),
            retry: default_conversion_retry(),
        }
    }
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The rendering-safe styling contract handed to the generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    #[serde(default = "default_fonts")]
    pub fonts: Vec<String>,

    #[serde(default = "default_tags")]
    pub allowed_tags: Vec<String>,

    #[serde(default = "default_primary_color")]
    pub primary_color: String,

    #[serde(default = "default_accent_color")]
    pub accent_color: String,

    #[serde(default = "default_background_color")]
    pub background_color: String,

    #[serde(default = "default_layout_guidance")]
    pub layout_guidance: Vec<String>,
}

fn default_fonts() -> Vec<String> {
    [
        "Arial",
        "Helvetica",
        "Times New Roman",
        "Georgia",
        "Courier New",
        "Verdana",
        "Tahoma",
        "Trebuchet MS",
        "Impact",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_tags() -> Vec<String> {
    [
        "div", "h1", "h2", "h3", "h4", "h5", "h6", "p", "ul", "ol", "li", "span", "b", "i", "u",
        "strong", "em", "br",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_primary_color() -> String {
    "#2d3748".to_string()
}

fn default_accent_color() -> String {
    "#4c51bf".to_string()
}

fn default_background_color() -> String {
    "#f8f9fa".to_string()
}

fn default_layout_guidance() -> Vec<String> {
    vec![
        "Prefer a two-column layout when a chart is present: text in one column, charts in the other.".to_string(),
        "Never stack charts vertically below the text.".to_string(),
        "Use a 40%/60% flex split between text and chart columns.".to_string(),
        "When the answer is long, split it across two text columns instead of shrinking the font.".to_string(),
    ]
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            fonts: default_fonts(),
            allowed_tags: default_tags(),
            primary_color: default_primary_color(),
            accent_color: default_accent_color(),
            background_color: default_background_color(),
            layout_guidance: default_layout_guidance(),
        }
    }
}

impl StyleConfig {
    pub fn primary_font(&self) -> &str {
        self.fonts.first().map(String::as_str).unwrap_or("Arial")
    }
}

/// Where unassociated charts go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChartAssociation {
    /// Slide of the nearest preceding chart in asset order, else the first content slide
    #[default]
    Preceding,
    First,
    Last,
    /// Every chart must be associated explicitly
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    #[serde(default = "default_title_budget")]
    pub title_chars: usize,

    #[serde(default = "default_subtitle_budget")]
    pub subtitle_chars: usize,

    #[serde(default = "default_heading_budget")]
    pub heading_chars: usize,

    #[serde(default)]
    pub chart_association: ChartAssociation,
}

fn default_title_budget() -> usize {
    60
}

fn default_subtitle_budget() -> usize {
    80
}

fn default_heading_budget() -> usize {
    90
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            title_chars: default_title_budget(),
            subtitle_chars: default_subtitle_budget(),
            heading_chars: default_heading_budget(),
            chart_association: ChartAssociation::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Parent directory of per-request workspaces; system temp dir when unset
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Keep workspaces on disk after the request finishes
    #[serde(default)]
    pub keep_workspace: bool,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("generated_files")
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            output_root: default_output_root(),
            request_timeout_secs: default_request_timeout_secs(),
            keep_workspace: false,
        }
    }
}

impl WorkflowConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DeckConfig {
    /// Default config location
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deck")
            .join("config.toml")
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("[CONFIG] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overlay `DECK_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("DECK_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = lookup("DECK_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(flavor) = lookup("DECK_LLM_FLAVOR") {
            match flavor.to_lowercase().as_str() {
                "azure" => self.llm.flavor = LlmFlavor::Azure,
                "openai" => self.llm.flavor = LlmFlavor::OpenAI,
                other => tracing::warn!("[CONFIG] ignoring unknown DECK_LLM_FLAVOR '{}'", other),
            }
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("DECK_LLM_API_KEY").or_else(|| match self.llm.flavor {
                LlmFlavor::OpenAI => lookup("OPENAI_API_KEY"),
                LlmFlavor::Azure => lookup("AZURE_OPENAI_API_KEY"),
            });
        }
        if let Some(dir) = lookup("DECK_OUTPUT_DIR") {
            self.workflow.output_root = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DECK_WORKSPACE_DIR") {
            self.workflow.workspace_root = Some(PathBuf::from(dir));
        }
        if let Some(keep) = lookup("DECK_KEEP_WORKSPACE") {
            self.workflow.keep_workspace = keep == "1" || keep.eq_ignore_ascii_case("true");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.parallel_slides == 0 || self.generation.global_permits == 0 {
            return Err(ConfigError::Invalid(
                "generation concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.conversion.global_permits == 0 {
            return Err(ConfigError::Invalid(
                "conversion.global_permits must be at least 1".to_string(),
            ));
        }
        if self.conversion.program.trim().is_empty() {
            return Err(ConfigError::Invalid("conversion.program is empty".to_string()));
        }
        if self.style.fonts.is_empty() {
            return Err(ConfigError::Invalid("style.fonts must list at least one font".to_string()));
        }
        self.generation.retry.validate("generation.retry")?;
        self.conversion.retry.validate("conversion.retry")?;
        Ok(())
    }
}
