use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "market-newsletter";

/// Named settings loaded from a JSON file and overlaid on built-in defaults.
///
/// Keys the program does not know about are preserved so that `save` writes
/// back everything that was loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Settings {
    pub fn defaults() -> Self {
        let data_dir = default_data_dir();

        let mut values = Map::new();
        values.insert("cache_duration_minutes".into(), json!(30));
        values.insert("max_retries".into(), json!(3));
        values.insert("timeout_seconds".into(), json!(10));
        values.insert("retry_backoff_ms".into(), json!(0));
        values.insert(
            "output_directory".into(),
            json!(data_dir.join("outputs").to_string_lossy()),
        );
        values.insert(
            "cache_directory".into(),
            json!(data_dir.join("cache").to_string_lossy()),
        );
        values.insert("top_stocks_count".into(), json!(10));
        values.insert("news_count".into(), json!(5));
        values.insert("gemini_model".into(), json!("gemini-2.0-flash-exp"));
        values.insert("base_url".into(), json!("https://finance.naver.com"));

        Self { values }
    }

    /// Load settings from `path`. Never fails: a missing file yields the
    /// defaults, an unreadable one yields the defaults plus a warning.
    pub fn load(path: &Path) -> Self {
        Self::try_load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "failed to load settings, using defaults: {:#}", e);
            Self::defaults()
        })
    }

    /// Like `load`, but hands back the reason an existing file was rejected
    /// so the caller can report it once logging is up.
    pub fn try_load(path: &Path) -> Result<Self> {
        let mut settings = Self::defaults();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(settings);
        }

        for (key, value) in Self::read_overrides(path)? {
            settings.values.insert(key, value);
        }
        tracing::info!(path = %path.display(), "settings loaded");

        Ok(settings)
    }

    fn read_overrides(path: &Path) -> Result<Map<String, Value>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings JSON from {}", path.display()))?;

        match document {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!(
                "Settings file must contain a JSON object, found {}",
                json_kind(&other)
            ),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create settings directory")?;
            }
        }

        let json = serde_json::to_string_pretty(&self.values)
            .context("Failed to serialize settings")?;

        fs::write(path, json)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

        tracing::info!(path = %path.display(), "settings saved");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Look up `key`, returning `default` when it is absent or has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.values.get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(key, "ignoring malformed setting: {}", e);
                    default
                }
            },
            None => default,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn cache_duration(&self) -> Duration {
        let minutes = self.get_or::<u64>("cache_duration_minutes", 30);
        match minutes.checked_mul(60) {
            Some(secs) => Duration::from_secs(secs),
            None => {
                tracing::warn!(minutes, "cache_duration_minutes out of range, using 30");
                Duration::from_secs(30 * 60)
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.get_or("max_retries", 3)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.get_or("timeout_seconds", 10))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.get_or("retry_backoff_ms", 0))
    }

    pub fn output_directory(&self) -> PathBuf {
        self.get_or("output_directory", default_data_dir().join("outputs"))
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.get_or("cache_directory", default_data_dir().join("cache"))
    }

    pub fn newsletter_path(&self) -> PathBuf {
        self.get_or(
            "newsletter_path",
            self.output_directory().join("newsletter.md"),
        )
    }

    pub fn top_stocks_count(&self) -> usize {
        self.get_or("top_stocks_count", 10)
    }

    pub fn news_count(&self) -> usize {
        self.get_or("news_count", 5)
    }

    pub fn gemini_model(&self) -> String {
        self.get_or("gemini_model", "gemini-2.0-flash-exp".to_string())
    }

    pub fn base_url(&self) -> String {
        self.get_or("base_url", "https://finance.naver.com".to_string())
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.get_or("log_file", None)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default location of the settings file
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub gemini_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .context(
                "GEMINI_API_KEY not found.\n\n\
                To fix this, create ~/.config/market-newsletter/.env with:\n  \
                GEMINI_API_KEY=your_key_here\n\n\
                Get a Gemini API key from: https://aistudio.google.com/app/apikey",
            )?;

        Ok(Self { gemini_api_key })
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/market-newsletter/.env
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(APP_DIR).join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}
