//! Service configuration.
//!
//! Read once at startup from the environment (after loading `.env` if
//! present) and handed to each component constructor as an explicit value.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

const DEFAULT_MODELS: &str = "llama-3.1-8b-instant,llama-3.3-70b-versatile,mixtral-8x7b-32768";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the JSON document store.
    pub data_dir: PathBuf,
    pub ai: AiSettings,
    pub render: RenderSettings,
    pub storage: StorageSettings,
    pub worker: WorkerSettings,
}

/// Text-generation settings shared by the markup generator and the frame
/// sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Pool the model picker chooses from on every attempt.
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub frame_max_tokens: u32,
    pub timeout_secs: u64,
    pub markup_attempts: u32,
    pub frame_attempts: u32,
    pub retry_pause_ms: u64,
}

impl AiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn is_configured(&self) -> bool {
        !self.provider.is_empty()
            && !self.models.is_empty()
            && (self.provider == "ollama" || !self.api_key.is_empty())
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            api_key: String::new(),
            models: split_list(DEFAULT_MODELS),
            temperature: 0.3,
            max_tokens: 1000,
            frame_max_tokens: 2000,
            timeout_secs: 60,
            markup_attempts: 5,
            frame_attempts: 3,
            retry_pause_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl RenderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://mermaid.ink".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Directory assets are written under.
    pub root: PathBuf,
    /// Base URL the asset root is served from.
    pub public_base_url: String,
    pub frame_duration_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSettings {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 64,
        }
    }
}

/// Resolve the default data directory (~/.diagai/).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".diagai")
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "loaded environment file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `load` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = var("DIAGAI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let storage_root = var("STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("storage"));

        let defaults = AiSettings::default();
        let ai = AiSettings {
            provider: var("LLM_PROVIDER").unwrap_or(defaults.provider),
            api_key: var("LLM_API_KEY")
                .or_else(|| var("GROQ_API_KEY"))
                .unwrap_or_default(),
            models: var("LLM_MODELS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.models),
            temperature: parse(&var, "LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse(&var, "LLM_MAX_TOKENS", defaults.max_tokens)?,
            frame_max_tokens: parse(&var, "LLM_FRAME_MAX_TOKENS", defaults.frame_max_tokens)?,
            timeout_secs: parse(&var, "LLM_TIMEOUT_SECS", defaults.timeout_secs)?,
            markup_attempts: at_least_one(parse(&var, "MARKUP_ATTEMPTS", defaults.markup_attempts)?, "MARKUP_ATTEMPTS")?,
            frame_attempts: at_least_one(parse(&var, "FRAME_ATTEMPTS", defaults.frame_attempts)?, "FRAME_ATTEMPTS")?,
            retry_pause_ms: parse(&var, "RETRY_PAUSE_MS", defaults.retry_pause_ms)?,
        };
        if ai.models.is_empty() {
            return Err(ConfigError::Invalid {
                key: "LLM_MODELS",
                value: String::new(),
                reason: "at least one model is required".to_string(),
            });
        }

        let render_defaults = RenderSettings::default();
        let render = RenderSettings {
            base_url: var("RENDER_URL").unwrap_or(render_defaults.base_url),
            timeout_secs: parse(&var, "RENDER_TIMEOUT_SECS", render_defaults.timeout_secs)?,
        };

        let storage = StorageSettings {
            root: storage_root,
            public_base_url: var("STORAGE_URL")
                .unwrap_or_else(|| "http://localhost:8000/storage".to_string()),
            frame_duration_ms: parse(&var, "ANIMATION_FRAME_MS", 1000)?,
        };

        let worker_defaults = WorkerSettings::default();
        let worker = WorkerSettings {
            workers: at_least_one(parse(&var, "GENERATION_WORKERS", worker_defaults.workers)?, "GENERATION_WORKERS")?,
            queue_depth: at_least_one(parse(&var, "GENERATION_QUEUE_DEPTH", worker_defaults.queue_depth)?, "GENERATION_QUEUE_DEPTH")?,
        };

        Ok(Self {
            data_dir,
            ai,
            render,
            storage,
            worker,
        })
    }
}

fn parse<T, V>(var: &V, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => {
            debug!(key, "not set, using default");
            Ok(default)
        }
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn at_least_one<T>(value: T, key: &'static str) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8> + Display,
{
    if value < T::from(1) {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[("DIAGAI_DATA_DIR", "/srv/diagai")]).unwrap();
        assert_eq!(cfg.storage.root, PathBuf::from("/srv/diagai/storage"));
        assert_eq!(cfg.ai.models.len(), 3);
        assert_eq!(cfg.ai.timeout(), Duration::from_secs(60));
        assert_eq!(cfg.render.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.ai.markup_attempts, 5);
        assert_eq!(cfg.ai.frame_attempts, 3);
        assert_eq!(cfg.storage.frame_duration_ms, 1000);
        assert!(!cfg.ai.is_configured());
    }

    #[test]
    fn overrides_and_key_fallback() {
        let cfg = config(&[
            ("GROQ_API_KEY", "gsk_test"),
            ("LLM_MODELS", " a , b ,"),
            ("GENERATION_WORKERS", "2"),
            ("STORAGE_URL", "https://cdn.example.com/assets"),
        ])
        .unwrap();
        assert_eq!(cfg.ai.api_key, "gsk_test");
        assert_eq!(cfg.ai.models, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cfg.worker.workers, 2);
        assert_eq!(cfg.storage.public_base_url, "https://cdn.example.com/assets");
        assert!(cfg.ai.is_configured());
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = config(&[("LLM_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("LLM_TIMEOUT_SECS"));

        let err = config(&[("GENERATION_WORKERS", "0")]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn ollama_needs_no_key() {
        let cfg = config(&[("LLM_PROVIDER", "ollama"), ("LLM_MODELS", "llama3")]).unwrap();
        assert!(cfg.ai.is_configured());
    }
}
