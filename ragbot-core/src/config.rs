use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

/// Variables used by earlier deployments of the chatbot, mapped onto config keys.
/// They take precedence over the TOML file and the `RAGBOT__*` variables.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("DB_HOST", "database.host"),
    ("DB_PORT", "database.port"),
    ("DB_USER", "database.user"),
    ("DB_PASSWORD", "database.password"),
    ("DB_NAME", "database.name"),
    ("MAX_QUESTIONS", "gating.max_questions"),
];

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RagbotConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub gating: GatingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; when set it wins over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "chatbot".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return url.parse();
        }
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatingConfig {
    pub max_questions: u32,
    pub answer_timeout_seconds: u64,
    /// Transcript messages fed back to the model as conversation history.
    pub history_messages: u32,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            max_questions: 5,
            answer_timeout_seconds: 60,
            history_messages: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: u32,
    pub embedding_model: String,
    pub embedding_dimensions: u32,
    pub base_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            embedding_model: "gemini-embedding-001".to_string(),
            embedding_dimensions: 768,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    /// Prompt template file; the built-in template is used when unset.
    pub prompt_path: Option<String>,
    pub base_url: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            max_output_tokens: None,
            prompt_path: None,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub cors_allow_all: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allow_all: true,
        }
    }
}

impl RagbotConfig {
    /// Load from an optional TOML file, `RAGBOT__SECTION__KEY` variables and the
    /// legacy `DB_*` / `MAX_QUESTIONS` variables, in increasing precedence.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("RAGBOT")
                    .separator("__")
                    .try_parsing(true),
            );
        let config: RagbotConfig = apply_legacy_env(builder, lookup)?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gating.max_questions == 0 {
            return Err(ConfigError::Message(
                "gating.max_questions must be at least 1".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Message(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn apply_legacy_env<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (var, key) in LEGACY_ENV_KEYS {
        builder = builder.set_override_option(*key, lookup(var))?;
    }
    Ok(builder)
}
