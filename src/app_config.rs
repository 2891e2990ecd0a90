use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::UserError;

/// Application configuration module.
///
/// Settings are a persisted singleton: the database holds the durable copy,
/// [`SettingsStore`] holds the in-memory snapshot every component reads, and
/// uppercase environment variables seed the initial defaults on first run.

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI chat completions API
    #[default]
    OpenAI,
    /// Anthropic messages API
    Claude,
    /// DeepSeek (OpenAI-compatible)
    DeepSeek,
    /// Zhipu GLM (OpenAI-compatible)
    Glm,
}

impl LlmProvider {
    /// All providers, in presentation order
    pub fn all() -> &'static [LlmProvider] {
        &[Self::OpenAI, Self::Claude, Self::DeepSeek, Self::Glm]
    }

    /// The identifier used in the API surface and the database
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Claude => "claude",
            Self::DeepSeek => "deepseek",
            Self::Glm => "glm",
        }
    }

    /// Returns the properly capitalized name of the provider
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Claude => "Claude",
            Self::DeepSeek => "DeepSeek",
            Self::Glm => "GLM",
        }
    }

    /// Model used when the settings do not name one
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Claude => "claude-sonnet-4-20250514",
            Self::DeepSeek => "deepseek-chat",
            Self::Glm => "glm-4-flash",
        }
    }

    /// Models offered through the provider enumeration endpoint
    pub fn known_models(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAI => &["gpt-4o-mini", "gpt-4o", "gpt-4.1-mini", "gpt-4.1"],
            Self::Claude => &[
                "claude-sonnet-4-20250514",
                "claude-3-7-sonnet-20250219",
                "claude-3-5-haiku-20241022",
            ],
            Self::DeepSeek => &["deepseek-chat", "deepseek-reasoner"],
            Self::Glm => &["glm-4-flash", "glm-4-plus", "glm-4-air"],
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "claude" | "anthropic" => Ok(Self::Claude),
            "deepseek" => Ok(Self::DeepSeek),
            "glm" | "zhipu" => Ok(Self::Glm),
            other => Err(UserError::UnknownProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Output placement for finished translations
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Mux the subtitle into an MKV container
    Mkv,
    /// Sibling SubRip file
    #[default]
    Srt,
    /// Sibling Advanced SubStation Alpha file
    Ass,
}

impl OutputFormat {
    /// File extension for external subtitle outputs
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Srt => "srt",
            Self::Ass => "ass",
        }
    }
}

/// Persisted singleton configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// OpenAI API key
    #[serde(default)]
    pub openai_api_key: String,
    /// OpenAI model name
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Optional OpenAI-compatible endpoint override
    #[serde(default)]
    pub openai_base_url: Option<String>,

    /// Anthropic API key
    #[serde(default)]
    pub claude_api_key: String,
    /// Anthropic model name
    #[serde(default = "default_claude_model")]
    pub claude_model: String,

    /// DeepSeek API key
    #[serde(default)]
    pub deepseek_api_key: String,
    /// DeepSeek model name
    #[serde(default = "default_deepseek_model")]
    pub deepseek_model: String,
    /// Optional DeepSeek endpoint override
    #[serde(default)]
    pub deepseek_base_url: Option<String>,

    /// GLM API key
    #[serde(default)]
    pub glm_api_key: String,
    /// GLM model name
    #[serde(default = "default_glm_model")]
    pub glm_model: String,
    /// Optional GLM endpoint override
    #[serde(default)]
    pub glm_base_url: Option<String>,

    /// Provider used when a task does not name one
    #[serde(default)]
    pub default_llm: LlmProvider,

    /// Target language for translation (name or code)
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Source language, or "auto" for track-based selection
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Emit translated + original text in each dialogue unit
    #[serde(default)]
    pub bilingual_output: bool,
    /// Put the original line above the translation in bilingual mode
    #[serde(default)]
    pub bilingual_original_first: bool,
    /// Separator between the two lines; empty means the format-native newline
    #[serde(default)]
    pub bilingual_separator: Option<String>,

    /// Where finished translations are placed
    #[serde(default)]
    pub subtitle_output_format: OutputFormat,
    /// Replace the source MKV instead of writing a new container
    #[serde(default)]
    pub overwrite_mkv: bool,

    /// Maximum number of concurrently running tasks (1..=10)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Hard timeout for a single LLM call in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    /// Character budget per translation chunk
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    /// Maximum dialogue units per translation chunk
    #[serde(default = "default_chunk_max_units")]
    pub chunk_max_units: usize,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_claude_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_deepseek_model() -> String {
    "deepseek-chat".to_string()
}

fn default_glm_model() -> String {
    "glm-4-flash".to_string()
}

fn default_target_language() -> String {
    "Chinese".to_string()
}

fn default_source_language() -> String {
    "auto".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    2
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_chunk_max_chars() -> usize {
    3000
}

fn default_chunk_max_units() -> usize {
    50
}

impl Default for Settings {
    fn default() -> Self {
        // Round-trips through serde so every field picks up its default fn
        serde_json::from_str("{}").expect("empty settings object must deserialize")
    }
}

impl Settings {
    /// Defaults seeded from uppercase environment variables.
    ///
    /// Every settings key is mirrored: `OPENAI_API_KEY`, `DEFAULT_LLM`,
    /// `TARGET_LANGUAGE`, `MAX_CONCURRENT_TASKS`, and so on. Unparseable
    /// values keep the built-in default.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        let env_string = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let env_bool = |key: &str| {
            env_string(key).and_then(|v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
        };

        if let Some(v) = env_string("OPENAI_API_KEY") {
            settings.openai_api_key = v;
        }
        if let Some(v) = env_string("OPENAI_MODEL") {
            settings.openai_model = v;
        }
        if let Some(v) = env_string("OPENAI_BASE_URL") {
            settings.openai_base_url = Some(v);
        }
        if let Some(v) = env_string("CLAUDE_API_KEY") {
            settings.claude_api_key = v;
        }
        if let Some(v) = env_string("CLAUDE_MODEL") {
            settings.claude_model = v;
        }
        if let Some(v) = env_string("DEEPSEEK_API_KEY") {
            settings.deepseek_api_key = v;
        }
        if let Some(v) = env_string("DEEPSEEK_MODEL") {
            settings.deepseek_model = v;
        }
        if let Some(v) = env_string("DEEPSEEK_BASE_URL") {
            settings.deepseek_base_url = Some(v);
        }
        if let Some(v) = env_string("GLM_API_KEY") {
            settings.glm_api_key = v;
        }
        if let Some(v) = env_string("GLM_MODEL") {
            settings.glm_model = v;
        }
        if let Some(v) = env_string("GLM_BASE_URL") {
            settings.glm_base_url = Some(v);
        }
        if let Some(v) = env_string("DEFAULT_LLM") {
            if let Ok(provider) = v.parse() {
                settings.default_llm = provider;
            }
        }
        if let Some(v) = env_string("TARGET_LANGUAGE") {
            settings.target_language = v;
        }
        if let Some(v) = env_string("SOURCE_LANGUAGE") {
            settings.source_language = v;
        }
        if let Some(v) = env_bool("BILINGUAL_OUTPUT") {
            settings.bilingual_output = v;
        }
        if let Some(v) = env_string("SUBTITLE_OUTPUT_FORMAT") {
            match v.to_lowercase().as_str() {
                "mkv" => settings.subtitle_output_format = OutputFormat::Mkv,
                "srt" => settings.subtitle_output_format = OutputFormat::Srt,
                "ass" => settings.subtitle_output_format = OutputFormat::Ass,
                _ => {}
            }
        }
        if let Some(v) = env_bool("OVERWRITE_MKV") {
            settings.overwrite_mkv = v;
        }
        if let Some(v) = env_string("MAX_CONCURRENT_TASKS") {
            if let Ok(n) = v.parse() {
                settings.max_concurrent_tasks = n;
            }
        }
        if let Some(v) = env_string("LLM_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                settings.llm_timeout_secs = n;
            }
        }

        settings.normalize();
        settings
    }

    /// Enforce the mutual constraint between output format and in-place
    /// replacement: `overwrite_mkv=true` implies MKV output, and a non-MKV
    /// output format clears `overwrite_mkv`.
    pub fn normalize(&mut self) {
        if self.subtitle_output_format != OutputFormat::Mkv {
            self.overwrite_mkv = false;
        }
    }

    /// Validate value ranges, rejecting the update when out of bounds
    pub fn validate(&self) -> Result<(), UserError> {
        for (key, base_url) in [
            ("openai_base_url", &self.openai_base_url),
            ("deepseek_base_url", &self.deepseek_base_url),
            ("glm_base_url", &self.glm_base_url),
        ] {
            if let Some(raw) = base_url {
                url::Url::parse(raw).map_err(|e| {
                    UserError::InvalidSetting(format!("{} is not a valid URL: {}", key, e))
                })?;
            }
        }
        if !(1..=10).contains(&self.max_concurrent_tasks) {
            return Err(UserError::InvalidSetting(format!(
                "max_concurrent_tasks must be within 1..=10, got {}",
                self.max_concurrent_tasks
            )));
        }
        if self.llm_timeout_secs == 0 {
            return Err(UserError::InvalidSetting(
                "llm_timeout_secs must be positive".to_string(),
            ));
        }
        if self.chunk_max_chars == 0 || self.chunk_max_units == 0 {
            return Err(UserError::InvalidSetting(
                "chunk limits must be positive".to_string(),
            ));
        }
        if crate::language_utils::resolve_tag(&self.target_language).is_none() {
            return Err(UserError::InvalidSetting(format!(
                "unknown target_language: {}",
                self.target_language
            )));
        }
        Ok(())
    }

    /// API key configured for a provider
    pub fn api_key_for(&self, provider: LlmProvider) -> &str {
        match provider {
            LlmProvider::OpenAI => &self.openai_api_key,
            LlmProvider::Claude => &self.claude_api_key,
            LlmProvider::DeepSeek => &self.deepseek_api_key,
            LlmProvider::Glm => &self.glm_api_key,
        }
    }

    /// Model configured for a provider
    pub fn model_for(&self, provider: LlmProvider) -> &str {
        match provider {
            LlmProvider::OpenAI => &self.openai_model,
            LlmProvider::Claude => &self.claude_model,
            LlmProvider::DeepSeek => &self.deepseek_model,
            LlmProvider::Glm => &self.glm_model,
        }
    }

    /// Endpoint override configured for a provider, if any
    pub fn base_url_for(&self, provider: LlmProvider) -> Option<&str> {
        match provider {
            LlmProvider::OpenAI => self.openai_base_url.as_deref(),
            LlmProvider::Claude => None,
            LlmProvider::DeepSeek => self.deepseek_base_url.as_deref(),
            LlmProvider::Glm => self.glm_base_url.as_deref(),
        }
    }
}

/// Shared, versioned snapshot of the settings singleton.
///
/// Readers clone an `Arc<Settings>` and never block a writer; the version
/// counter lets long-lived components detect staleness cheaply.
pub struct SettingsStore {
    snapshot: RwLock<Arc<Settings>>,
    version: AtomicU64,
}

impl SettingsStore {
    /// Create a store with the given initial settings
    pub fn new(settings: Settings) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(settings)),
            version: AtomicU64::new(1),
        }
    }

    /// The current settings snapshot
    pub fn current(&self) -> Arc<Settings> {
        self.snapshot.read().clone()
    }

    /// Replace the settings, bumping the version
    pub fn replace(&self, mut settings: Settings) -> Result<Arc<Settings>, UserError> {
        settings.normalize();
        settings.validate()?;
        let snapshot = Arc::new(settings);
        *self.snapshot.write() = snapshot.clone();
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(snapshot)
    }

    /// Monotonic version of the snapshot
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_should_match_documented_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.openai_model, "gpt-4o-mini");
        assert_eq!(settings.claude_model, "claude-sonnet-4-20250514");
        assert_eq!(settings.deepseek_model, "deepseek-chat");
        assert_eq!(settings.glm_model, "glm-4-flash");
        assert_eq!(settings.default_llm, LlmProvider::OpenAI);
        assert_eq!(settings.target_language, "Chinese");
        assert_eq!(settings.source_language, "auto");
        assert!(!settings.bilingual_output);
        assert_eq!(settings.max_concurrent_tasks, 2);
        assert_eq!(settings.llm_timeout_secs, 60);
        assert_eq!(settings.chunk_max_chars, 3000);
        assert_eq!(settings.chunk_max_units, 50);
        assert!(!settings.overwrite_mkv);
    }

    #[test]
    fn test_normalize_should_clear_overwrite_for_external_formats() {
        let mut settings = Settings::default();
        settings.overwrite_mkv = true;
        settings.subtitle_output_format = OutputFormat::Srt;
        settings.normalize();
        assert!(!settings.overwrite_mkv);

        let mut settings = Settings::default();
        settings.overwrite_mkv = true;
        settings.subtitle_output_format = OutputFormat::Mkv;
        settings.normalize();
        assert!(settings.overwrite_mkv);
    }

    #[test]
    fn test_validate_should_reject_out_of_range_concurrency() {
        let mut settings = Settings::default();
        settings.max_concurrent_tasks = 0;
        assert!(settings.validate().is_err());
        settings.max_concurrent_tasks = 11;
        assert!(settings.validate().is_err());
        settings.max_concurrent_tasks = 10;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_should_reject_unknown_target_language() {
        let mut settings = Settings::default();
        settings.target_language = "Klingon".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_should_reject_malformed_base_url() {
        let mut settings = Settings::default();
        settings.openai_base_url = Some("not a url".to_string());
        assert!(settings.validate().is_err());

        settings.openai_base_url = Some("https://proxy.example.com/v1".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_provider_parse_and_display_round_trip() {
        for provider in LlmProvider::all() {
            let parsed: LlmProvider = provider.id().parse().unwrap();
            assert_eq!(parsed, *provider);
        }
        assert!("nonsense".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_settings_store_replace_should_bump_version() {
        let store = SettingsStore::new(Settings::default());
        let v1 = store.version();

        let mut updated = Settings::default();
        updated.target_language = "English".to_string();
        store.replace(updated).unwrap();

        assert!(store.version() > v1);
        assert_eq!(store.current().target_language, "English");
    }

    #[test]
    fn test_settings_store_replace_should_reject_invalid() {
        let store = SettingsStore::new(Settings::default());
        let mut bad = Settings::default();
        bad.max_concurrent_tasks = 99;
        assert!(store.replace(bad).is_err());
        assert_eq!(store.current().max_concurrent_tasks, 2);
    }

    #[test]
    fn test_settings_json_round_trip() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, back);
    }
}
