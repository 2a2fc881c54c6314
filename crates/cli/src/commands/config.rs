use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hrflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let database = &config.database;
    let llm = &config.llm;
    let pipeline = &config.pipeline;

    vec![
        Field::new("database.url", Some("HRFLOW_DATABASE_URL"), &database.url),
        Field::new(
            "database.max_connections",
            Some("HRFLOW_DATABASE_MAX_CONNECTIONS"),
            database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            Some("HRFLOW_DATABASE_TIMEOUT_SECS"),
            database.timeout_secs.to_string(),
        ),
        Field::new("llm.provider", Some("HRFLOW_LLM_PROVIDER"), format!("{:?}", llm.provider)),
        Field::new("llm.model", Some("HRFLOW_LLM_MODEL"), &llm.model),
        Field::new(
            "llm.base_url",
            Some("HRFLOW_LLM_BASE_URL"),
            llm.base_url.as_deref().unwrap_or("<provider default>"),
        ),
        Field::new(
            "llm.api_key",
            Some("HRFLOW_LLM_API_KEY"),
            redact_key(llm.api_key.as_ref().map(|key| key.expose_secret())),
        ),
        Field::new(
            "pipeline.capability_timeout_secs",
            Some("HRFLOW_PIPELINE_CAPABILITY_TIMEOUT_SECS"),
            pipeline.capability_timeout_secs.to_string(),
        ),
        Field::new(
            "pipeline.prompt_word_budget",
            Some("HRFLOW_PIPELINE_PROMPT_WORD_BUDGET"),
            pipeline.prompt_word_budget.to_string(),
        ),
        Field::new(
            "pipeline.pattern_scan_limit",
            None,
            pipeline.pattern_scan_limit.to_string(),
        ),
        Field::new(
            "pipeline.cache_capacity",
            Some("HRFLOW_PIPELINE_CACHE_CAPACITY"),
            pipeline.cache_capacity.to_string(),
        ),
        Field::new(
            "pipeline.enrichment_enabled",
            Some("HRFLOW_PIPELINE_ENRICHMENT_ENABLED"),
            pipeline.enrichment_enabled.to_string(),
        ),
        Field::new(
            "pipeline.learning_mode",
            Some("HRFLOW_PIPELINE_LEARNING_MODE"),
            format!("{:?}", pipeline.learning_mode),
        ),
        Field::new(
            "pipeline.max_tools_per_request",
            Some("HRFLOW_PIPELINE_MAX_TOOLS"),
            pipeline.max_tools_per_request.to_string(),
        ),
        Field::new(
            "pipeline.recent_context_limit",
            None,
            pipeline.recent_context_limit.to_string(),
        ),
        Field::new("logging.level", Some("HRFLOW_LOGGING_LEVEL"), &config.logging.level),
        Field::new(
            "logging.format",
            Some("HRFLOW_LOGGING_FORMAT"),
            format!("{:?}", config.logging.format),
        ),
    ]
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("hrflow.toml"), PathBuf::from("config/hrflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable `sk-` style prefix and hides the rest.
fn redact_key(key: Option<&str>) -> String {
    let Some(key) = key.map(str::trim) else {
        return "<unset>".to_string();
    };
    if key.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = key.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
