use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::ModelCatalog;
use crate::infrastructure::external_services::InferenceClientConfig;
use crate::infrastructure::messaging::WorkerSettings;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub default_model: String,
    pub default_context_limit: usize,
    pub model_context_limits: HashMap<String, usize>,
    pub answer_token_reserve: usize,
    pub worker_count: usize,
    pub token_flush_interval: Duration,
    pub cancel_poll_interval: Duration,
    pub stream_stall_timeout: Option<Duration>,
    pub progress_channel_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_pool_size: u32,
    pub port: u16,
    pub inference: InferenceClientConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Reads the process environment. Call `dotenv` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let database_url = vars
            .get("DATABASE_URL")
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let inference = InferenceClientConfig {
            base_url: vars
                .get("INFERENCE_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
            api_key: vars.get("INFERENCE_API_KEY"),
            connect_timeout_secs: vars.parse("INFERENCE_TIMEOUT_SECS", 10)?,
            max_retries: vars.parse("INFERENCE_MAX_RETRIES", 3)?,
            backoff_factor: vars.parse("INFERENCE_BACKOFF_FACTOR", 2.0)?,
        };

        let analysis = AnalysisConfig {
            default_model: vars
                .get("ANALYSIS_DEFAULT_MODEL")
                .unwrap_or_else(|| "llama3.1:8b".to_string()),
            default_context_limit: vars.parse("ANALYSIS_DEFAULT_CONTEXT_LIMIT", 8192)?,
            model_context_limits: match vars.get("ANALYSIS_MODEL_CONTEXT_LIMITS") {
                Some(raw) => parse_context_limits(&raw)?,
                None => HashMap::new(),
            },
            answer_token_reserve: vars.parse("ANALYSIS_ANSWER_TOKEN_RESERVE", 2048)?,
            worker_count: vars.parse("ANALYSIS_WORKER_COUNT", 2)?,
            token_flush_interval: Duration::from_millis(vars.parse("ANALYSIS_TOKEN_FLUSH_MS", 100)?),
            cancel_poll_interval: Duration::from_millis(vars.parse("ANALYSIS_CANCEL_POLL_MS", 1000)?),
            stream_stall_timeout: vars
                .parse_optional::<u64>("ANALYSIS_STREAM_STALL_TIMEOUT_SECS")?
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            progress_channel_capacity: vars.parse("PROGRESS_CHANNEL_CAPACITY", 256)?,
        };

        if analysis.worker_count == 0 {
            return Err(ConfigError::Invalid {
                name: "ANALYSIS_WORKER_COUNT",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            database_pool_size: vars.parse("DATABASE_POOL_SIZE", 10)?,
            port: vars.parse("PORT", 3000)?,
            inference,
            analysis,
        })
    }

    pub fn model_catalog(&self) -> ModelCatalog {
        ModelCatalog {
            default_model: self.analysis.default_model.clone(),
            default_context_limit: self.analysis.default_context_limit,
            context_limits: self.analysis.model_context_limits.clone(),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            default_model: self.analysis.default_model.clone(),
            flush_interval: self.analysis.token_flush_interval,
            cancel_poll_interval: self.analysis.cancel_poll_interval,
            stall_timeout: self.analysis.stream_stall_timeout,
        }
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank values are treated the same.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_optional<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        self.get(name)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|_| ConfigError::Invalid { name, value })
            })
            .transpose()
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_optional(name)?.unwrap_or(default))
    }
}

/// Parses `model=limit` pairs separated by commas.
fn parse_context_limits(raw: &str) -> Result<HashMap<String, usize>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "ANALYSIS_MODEL_CONTEXT_LIMITS",
        value: raw.to_string(),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (model, limit) = pair.rsplit_once('=').ok_or_else(invalid)?;
            let model = model.trim();
            let limit = limit.trim().parse::<usize>().map_err(|_| invalid())?;
            if model.is_empty() || limit == 0 {
                return Err(invalid());
            }
            Ok((model.to_string(), limit))
        })
        .collect()
}
