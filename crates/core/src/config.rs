use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::knowledge::{ChunkingSettings, RetrievalSettings};
use crate::normalizer::Severity;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
    pub normalizer: NormalizerConfig,
    pub dialogue: DialogueConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub dimensions: usize,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub source_dir: PathBuf,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub top_k: usize,
    pub min_relevance: f32,
}

#[derive(Clone, Debug)]
pub struct NormalizerConfig {
    pub order_id_prefix: String,
    pub order_id_digits: usize,
    pub phone_country_code: String,
    pub phone_trunk_prefix: String,
    pub phone_national_digits: usize,
    pub free_text_max_chars: usize,
    pub block_severity: Severity,
    /// Added to the built-in denylist, never replacing it.
    pub extra_denylist: Vec<DenylistPattern>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenylistPattern {
    pub name: String,
    pub pattern: String,
    pub severity: Severity,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub transitions_path: Option<PathBuf>,
    pub max_phone_attempts: u32,
    pub history_window_turns: usize,
    /// Turns kept on a live session; the prompt window is taken from these.
    pub max_stored_turns: usize,
    pub max_prompt_chars: usize,
    pub session_ttl_secs: u64,
    pub min_detail_chars: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Hashing,
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub embedding_backend: Option<EmbeddingBackend>,
    pub knowledge_source_dir: Option<PathBuf>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://trustline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                embedding_model: "nomic-embed-text".to_string(),
                timeout_secs: 20,
                max_retries: 1,
                temperature: 0.3,
                max_tokens: 400,
            },
            embedding: EmbeddingConfig { backend: EmbeddingBackend::Hashing, dimensions: 384 },
            knowledge: KnowledgeConfig {
                source_dir: PathBuf::from("knowledge"),
                chunk_max_chars: 400,
                chunk_overlap_chars: 50,
                top_k: 3,
                min_relevance: 0.15,
            },
            normalizer: NormalizerConfig {
                order_id_prefix: "ORD-".to_string(),
                order_id_digits: 3,
                phone_country_code: "962".to_string(),
                phone_trunk_prefix: "0".to_string(),
                phone_national_digits: 9,
                free_text_max_chars: 2_000,
                block_severity: Severity::High,
                extra_denylist: Vec::new(),
            },
            dialogue: DialogueConfig {
                transitions_path: None,
                max_phone_attempts: 3,
                history_window_turns: 10,
                max_stored_turns: 50,
                max_prompt_chars: 6_000,
                session_ttl_secs: 1_800,
                min_detail_chars: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl KnowledgeConfig {
    pub fn chunking(&self) -> ChunkingSettings {
        ChunkingSettings { max_chars: self.chunk_max_chars, overlap_chars: self.chunk_overlap_chars }
    }

    pub fn retrieval(&self) -> RetrievalSettings {
        RetrievalSettings { top_k: self.top_k, min_relevance: self.min_relevance }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "remote" => Ok(Self::Remote),
            other => Err(ConfigError::Validation(format!(
                "unsupported embedding backend `{other}` (expected hashing|remote)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("trustline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(embedding) = patch.embedding {
            if let Some(backend) = embedding.backend {
                self.embedding.backend = backend;
            }
            if let Some(dimensions) = embedding.dimensions {
                self.embedding.dimensions = dimensions;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(source_dir) = knowledge.source_dir {
                self.knowledge.source_dir = source_dir;
            }
            if let Some(chunk_max_chars) = knowledge.chunk_max_chars {
                self.knowledge.chunk_max_chars = chunk_max_chars;
            }
            if let Some(chunk_overlap_chars) = knowledge.chunk_overlap_chars {
                self.knowledge.chunk_overlap_chars = chunk_overlap_chars;
            }
            if let Some(top_k) = knowledge.top_k {
                self.knowledge.top_k = top_k;
            }
            if let Some(min_relevance) = knowledge.min_relevance {
                self.knowledge.min_relevance = min_relevance;
            }
        }

        if let Some(normalizer) = patch.normalizer {
            if let Some(prefix) = normalizer.order_id_prefix {
                self.normalizer.order_id_prefix = prefix;
            }
            if let Some(digits) = normalizer.order_id_digits {
                self.normalizer.order_id_digits = digits;
            }
            if let Some(country_code) = normalizer.phone_country_code {
                self.normalizer.phone_country_code = country_code;
            }
            if let Some(trunk_prefix) = normalizer.phone_trunk_prefix {
                self.normalizer.phone_trunk_prefix = trunk_prefix;
            }
            if let Some(national_digits) = normalizer.phone_national_digits {
                self.normalizer.phone_national_digits = national_digits;
            }
            if let Some(max_chars) = normalizer.free_text_max_chars {
                self.normalizer.free_text_max_chars = max_chars;
            }
            if let Some(block_severity) = normalizer.block_severity {
                self.normalizer.block_severity = block_severity.parse()?;
            }
            if let Some(rules) = normalizer.extra_denylist {
                self.normalizer.extra_denylist = rules
                    .into_iter()
                    .map(|rule| {
                        Ok(DenylistPattern {
                            name: rule.name,
                            pattern: rule.pattern,
                            severity: rule.severity.as_deref().unwrap_or("medium").parse()?,
                        })
                    })
                    .collect::<Result<_, ConfigError>>()?;
            }
        }

        if let Some(dialogue) = patch.dialogue {
            if let Some(path) = dialogue.transitions_path {
                self.dialogue.transitions_path = Some(path);
            }
            if let Some(max_phone_attempts) = dialogue.max_phone_attempts {
                self.dialogue.max_phone_attempts = max_phone_attempts;
            }
            if let Some(window) = dialogue.history_window_turns {
                self.dialogue.history_window_turns = window;
            }
            if let Some(max_stored_turns) = dialogue.max_stored_turns {
                self.dialogue.max_stored_turns = max_stored_turns;
            }
            if let Some(max_prompt_chars) = dialogue.max_prompt_chars {
                self.dialogue.max_prompt_chars = max_prompt_chars;
            }
            if let Some(ttl) = dialogue.session_ttl_secs {
                self.dialogue.session_ttl_secs = ttl;
            }
            if let Some(min_detail_chars) = dialogue.min_detail_chars {
                self.dialogue.min_detail_chars = min_detail_chars;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TRUSTLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TRUSTLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_value("TRUSTLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_value("TRUSTLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TRUSTLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = value;
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("TRUSTLINE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_value("TRUSTLINE_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("TRUSTLINE_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("TRUSTLINE_EMBEDDING_BACKEND") {
            self.embedding.backend = value.parse()?;
        }
        if let Some(value) = read_env("TRUSTLINE_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = parse_value("TRUSTLINE_EMBEDDING_DIMENSIONS", &value)?;
        }

        if let Some(value) = read_env("TRUSTLINE_KNOWLEDGE_SOURCE_DIR") {
            self.knowledge.source_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("TRUSTLINE_KNOWLEDGE_TOP_K") {
            self.knowledge.top_k = parse_value("TRUSTLINE_KNOWLEDGE_TOP_K", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_KNOWLEDGE_MIN_RELEVANCE") {
            self.knowledge.min_relevance =
                parse_value("TRUSTLINE_KNOWLEDGE_MIN_RELEVANCE", &value)?;
        }

        if let Some(value) = read_env("TRUSTLINE_NORMALIZER_BLOCK_SEVERITY") {
            self.normalizer.block_severity = value.parse()?;
        }

        if let Some(value) = read_env("TRUSTLINE_DIALOGUE_TRANSITIONS_PATH") {
            self.dialogue.transitions_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("TRUSTLINE_DIALOGUE_MAX_PHONE_ATTEMPTS") {
            self.dialogue.max_phone_attempts =
                parse_value("TRUSTLINE_DIALOGUE_MAX_PHONE_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_DIALOGUE_MAX_STORED_TURNS") {
            self.dialogue.max_stored_turns =
                parse_value("TRUSTLINE_DIALOGUE_MAX_STORED_TURNS", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_DIALOGUE_SESSION_TTL_SECS") {
            self.dialogue.session_ttl_secs =
                parse_value("TRUSTLINE_DIALOGUE_SESSION_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("TRUSTLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TRUSTLINE_SERVER_PORT") {
            self.server.port = parse_value("TRUSTLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TRUSTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_value("TRUSTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TRUSTLINE_LOGGING_LEVEL").or_else(|| read_env("TRUSTLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TRUSTLINE_LOGGING_FORMAT").or_else(|| read_env("TRUSTLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(backend) = overrides.embedding_backend {
            self.embedding.backend = backend;
        }
        if let Some(source_dir) = overrides.knowledge_source_dir {
            self.knowledge.source_dir = source_dir;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_embedding(&self.embedding)?;
        validate_knowledge(&self.knowledge)?;
        validate_normalizer(&self.normalizer)?;
        validate_dialogue(&self.dialogue)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("trustline.toml"), PathBuf::from("config/trustline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    // generation is retried at most once per turn
    if llm.max_retries > 1 {
        return Err(ConfigError::Validation("llm.max_retries must be 0 or 1".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_embedding(embedding: &EmbeddingConfig) -> Result<(), ConfigError> {
    if embedding.dimensions < 16 || embedding.dimensions > 8_192 {
        return Err(ConfigError::Validation(
            "embedding.dimensions must be in range 16..=8192".to_string(),
        ));
    }
    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.chunk_max_chars < 50 {
        return Err(ConfigError::Validation(
            "knowledge.chunk_max_chars must be at least 50".to_string(),
        ));
    }

    if knowledge.chunk_overlap_chars * 2 >= knowledge.chunk_max_chars {
        return Err(ConfigError::Validation(
            "knowledge.chunk_overlap_chars must be less than half of chunk_max_chars".to_string(),
        ));
    }

    if knowledge.top_k == 0 || knowledge.top_k > 50 {
        return Err(ConfigError::Validation("knowledge.top_k must be in range 1..=50".to_string()));
    }

    if !(-1.0..=1.0).contains(&knowledge.min_relevance) {
        return Err(ConfigError::Validation(
            "knowledge.min_relevance must be in range -1.0..=1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_normalizer(normalizer: &NormalizerConfig) -> Result<(), ConfigError> {
    let prefix = normalizer.order_id_prefix.trim();
    if prefix.is_empty() || prefix.chars().any(|ch| ch.is_ascii_digit() || ch.is_whitespace()) {
        return Err(ConfigError::Validation(
            "normalizer.order_id_prefix must be non-empty and contain no digits or spaces"
                .to_string(),
        ));
    }

    if normalizer.order_id_digits == 0 || normalizer.order_id_digits > 12 {
        return Err(ConfigError::Validation(
            "normalizer.order_id_digits must be in range 1..=12".to_string(),
        ));
    }

    let country_code = normalizer.phone_country_code.trim();
    if country_code.is_empty()
        || country_code.len() > 3
        || !country_code.chars().all(|ch| ch.is_ascii_digit())
    {
        return Err(ConfigError::Validation(
            "normalizer.phone_country_code must be 1 to 3 digits without `+`".to_string(),
        ));
    }

    if !normalizer.phone_trunk_prefix.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ConfigError::Validation(
            "normalizer.phone_trunk_prefix must contain digits only".to_string(),
        ));
    }

    if normalizer.phone_national_digits < 6 || normalizer.phone_national_digits > 12 {
        return Err(ConfigError::Validation(
            "normalizer.phone_national_digits must be in range 6..=12".to_string(),
        ));
    }

    if normalizer.free_text_max_chars < 16 {
        return Err(ConfigError::Validation(
            "normalizer.free_text_max_chars must be at least 16".to_string(),
        ));
    }

    for rule in &normalizer.extra_denylist {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "normalizer.extra_denylist entries need a non-empty name".to_string(),
            ));
        }
        if let Err(error) = regex::Regex::new(&rule.pattern) {
            return Err(ConfigError::Validation(format!(
                "normalizer.extra_denylist rule `{}` has an invalid pattern: {error}",
                rule.name
            )));
        }
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.max_phone_attempts == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_phone_attempts must be greater than zero".to_string(),
        ));
    }

    if dialogue.history_window_turns == 0 {
        return Err(ConfigError::Validation(
            "dialogue.history_window_turns must be greater than zero".to_string(),
        ));
    }

    if dialogue.max_stored_turns < dialogue.history_window_turns {
        return Err(ConfigError::Validation(
            "dialogue.max_stored_turns must be at least dialogue.history_window_turns".to_string(),
        ));
    }

    if dialogue.max_prompt_chars < 500 {
        return Err(ConfigError::Validation(
            "dialogue.max_prompt_chars must be at least 500".to_string(),
        ));
    }

    if dialogue.session_ttl_secs < 60 {
        return Err(ConfigError::Validation(
            "dialogue.session_ttl_secs must be at least 60".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    embedding: Option<EmbeddingPatch>,
    knowledge: Option<KnowledgePatch>,
    normalizer: Option<NormalizerPatch>,
    dialogue: Option<DialoguePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingPatch {
    backend: Option<EmbeddingBackend>,
    dimensions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    source_dir: Option<PathBuf>,
    chunk_max_chars: Option<usize>,
    chunk_overlap_chars: Option<usize>,
    top_k: Option<usize>,
    min_relevance: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct NormalizerPatch {
    order_id_prefix: Option<String>,
    order_id_digits: Option<usize>,
    phone_country_code: Option<String>,
    phone_trunk_prefix: Option<String>,
    phone_national_digits: Option<usize>,
    free_text_max_chars: Option<usize>,
    block_severity: Option<String>,
    extra_denylist: Option<Vec<DenylistPatternPatch>>,
}

#[derive(Debug, Deserialize)]
struct DenylistPatternPatch {
    name: String,
    pattern: String,
    severity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    transitions_path: Option<PathBuf>,
    max_phone_attempts: Option<u32>,
    history_window_turns: Option<usize>,
    max_stored_turns: Option<usize>,
    max_prompt_chars: Option<usize>,
    session_ttl_secs: Option<u64>,
    min_detail_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
    use crate::normalizer::Severity;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_any_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.knowledge.chunk_max_chars == 400, "default chunk bound is 400 chars")?;
        ensure(config.knowledge.chunk_overlap_chars == 50, "default overlap is 50 chars")?;
        ensure(config.knowledge.top_k == 3, "default top-k is 3")?;
        ensure(config.dialogue.max_phone_attempts == 3, "default phone attempts is 3")?;
        ensure(
            config.normalizer.block_severity == Severity::High,
            "default block severity is high",
        )?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TRUSTLINE_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("trustline.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_TRUSTLINE_LLM_KEY}"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TRUSTLINE_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRUSTLINE_LOG_LEVEL", "warn");
        env::set_var("TRUSTLINE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TRUSTLINE_LOG_LEVEL", "TRUSTLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRUSTLINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TRUSTLINE_DIALOGUE_MAX_PHONE_ATTEMPTS", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("trustline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[dialogue]
max_phone_attempts = 2

[knowledge]
top_k = 4

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.dialogue.max_phone_attempts == 5,
                "env phone attempts should win over file",
            )?;
            ensure(config.knowledge.top_k == 4, "file top-k should win over defaults")?;
            Ok(())
        })();

        clear_vars(&["TRUSTLINE_DATABASE_URL", "TRUSTLINE_DIALOGUE_MAX_PHONE_ATTEMPTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRUSTLINE_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["TRUSTLINE_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn overlap_must_stay_below_half_the_chunk_bound() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("trustline.toml");
        fs::write(
            &path,
            r#"
[knowledge]
chunk_max_chars = 100
chunk_overlap_chars = 60
"#,
        )
        .map_err(|err| err.to_string())?;

        let error = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .err()
            .ok_or_else(|| "overlap larger than half the chunk must be rejected".to_string())?;
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("chunk_overlap_chars")),
            "validation failure should mention chunk_overlap_chars",
        )
    }

    #[test]
    fn stored_turns_must_cover_the_prompt_window() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("trustline.toml");
        fs::write(
            &path,
            r#"
[dialogue]
history_window_turns = 10
max_stored_turns = 5
"#,
        )
        .map_err(|err| err.to_string())?;

        let error = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .err()
            .ok_or_else(|| "a stored history shorter than the prompt window must be rejected".to_string())?;
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("max_stored_turns")),
            "validation failure should mention max_stored_turns",
        )
    }

    #[test]
    fn extra_denylist_rules_load_and_bad_patterns_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let good = dir.path().join("good.toml");
        fs::write(
            &good,
            r#"
[[normalizer.extra_denylist]]
name = "competitor_spam"
pattern = "(?i)buy from shopco"
severity = "low"
"#,
        )
        .map_err(|err| err.to_string())?;
        let config = AppConfig::load(LoadOptions { config_path: Some(good), ..LoadOptions::default() })
            .map_err(|err| err.to_string())?;
        ensure(config.normalizer.extra_denylist.len() == 1, "one extra rule should load")?;
        ensure(
            config.normalizer.extra_denylist[0].severity == Severity::Low,
            "severity should come from the file",
        )?;

        let bad = dir.path().join("bad.toml");
        fs::write(
            &bad,
            r#"
[[normalizer.extra_denylist]]
name = "unbalanced"
pattern = "(refund"
"#,
        )
        .map_err(|err| err.to_string())?;
        let error = AppConfig::load(LoadOptions { config_path: Some(bad), ..LoadOptions::default() })
            .err()
            .ok_or_else(|| "an invalid denylist pattern must be rejected".to_string())?;
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("unbalanced")),
            "validation failure should name the rule",
        )
    }

    #[test]
    fn invalid_numeric_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRUSTLINE_SERVER_PORT", "eighty");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "non-numeric port must be rejected".to_string())?;
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "TRUSTLINE_SERVER_PORT"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["TRUSTLINE_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRUSTLINE_LLM_PROVIDER", "openai");
        env::set_var("TRUSTLINE_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["TRUSTLINE_LLM_PROVIDER", "TRUSTLINE_LLM_API_KEY"]);
        result
    }
}
