//! Engine configuration
//!
//! Defaults: a 120 s ceiling per request and a 15 s budget per strategy.
//! Every value can be overridden from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::fetch::DEFAULT_USER_AGENT;

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_STRATEGY_BUDGET: Duration = Duration::from_secs(15);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GUESS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// What an accessor error or timeout does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Soft miss: log it and keep going.
    #[default]
    Continue,
    /// Stop the whole run at the first accessor error or timeout, keeping
    /// whatever was already found. Matches the older per-site scrapers that
    /// closed the browser on the first exception.
    AbortRun,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" | "soft" => Ok(Self::Continue),
            "abort" | "strict" => Ok(Self::AbortRun),
            other => Err(format!("expected `continue` or `abort`, got `{other}`")),
        }
    }
}

/// Settings for the OpenAI-compatible guesser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ceiling for a whole run; on expiry the partial record is returned.
    pub run_timeout: Duration,
    /// Budget for strategies whose definition does not set `timeout_ms`.
    pub strategy_budget: Duration,
    pub failure_policy: FailurePolicy,
    /// `Some` when the LLM guess step is enabled.
    pub guess: Option<GuessConfig>,
    pub fetch_timeout: Duration,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout: DEFAULT_RUN_TIMEOUT,
            strategy_budget: DEFAULT_STRATEGY_BUDGET,
            failure_policy: FailurePolicy::Continue,
            guess: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for unparsable values, or when the LLM step
    /// is enabled without `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(raw) => parse_secs(key, &raw),
            }
        };

        let failure_policy = match get("SCOUT_FAILURE_POLICY") {
            None => defaults.failure_policy,
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "SCOUT_FAILURE_POLICY".to_string(),
                value: raw.clone(),
                reason,
            })?,
        };

        let guess_enabled = match get("SCOUT_LLM_ENABLED") {
            None => false,
            Some(raw) => parse_bool("SCOUT_LLM_ENABLED", &raw)?,
        };
        let guess = if guess_enabled {
            let api_key = get("OPENAI_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ConfigError::Invalid {
                    key: "OPENAI_API_KEY".to_string(),
                    value: String::new(),
                    reason: "required when SCOUT_LLM_ENABLED is set".to_string(),
                })?;
            Some(GuessConfig {
                base_url: get("SCOUT_LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
                api_key,
                model: get("SCOUT_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                timeout: secs("SCOUT_LLM_TIMEOUT_SECS", DEFAULT_GUESS_TIMEOUT)?,
            })
        } else {
            None
        };

        Ok(Self {
            run_timeout: secs("SCOUT_RUN_TIMEOUT_SECS", defaults.run_timeout)?,
            strategy_budget: secs("SCOUT_STRATEGY_BUDGET_SECS", defaults.strategy_budget)?,
            failure_policy,
            guess,
            fetch_timeout: secs("SCOUT_FETCH_TIMEOUT_SECS", defaults.fetch_timeout)?,
            user_agent: get("SCOUT_USER_AGENT").unwrap_or(defaults.user_agent),
        })
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let secs: f64 = raw.trim().parse().map_err(|_| invalid("not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid("must be a positive number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
