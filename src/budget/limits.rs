//! Run-wide budget ceilings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigProvider, ConfigProviderExt, ConfigResult, ValidationErrors};

/// Behavior when a response does not report usable token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenAccountingMode {
    /// Keep running, but stop enforcing the cumulative token ceiling.
    #[default]
    FailOpen,
    /// Fail the call with `USAGE_UNAVAILABLE`.
    FailClosed,
}

impl TokenAccountingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailOpen => "fail-open",
            Self::FailClosed => "fail-closed",
        }
    }
}

impl fmt::Display for TokenAccountingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenAccountingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "fail_open" => Ok(Self::FailOpen),
            "fail-closed" | "fail_closed" => Ok(Self::FailClosed),
            other => Err(format!(
                "unknown token accounting mode '{}', expected 'fail-open' or 'fail-closed'",
                other
            )),
        }
    }
}

/// Ceilings for a single run. Immutable once handed to a [`Budget`](super::Budget).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub max_steps: u64,
    pub max_tool_calls: u64,
    /// Wall-clock ceiling measured from budget creation.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Per-call ceiling written into every outbound request.
    pub max_output_tokens: u64,
    /// Cumulative ceiling across every call of the run.
    pub max_tokens: u64,
    #[serde(default)]
    pub token_accounting_mode: TokenAccountingMode,
    /// Echoed into every exhaustion signal for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl BudgetLimits {
    pub fn new(
        max_steps: u64,
        max_tool_calls: u64,
        timeout: Duration,
        max_output_tokens: u64,
        max_tokens: u64,
    ) -> Self {
        Self {
            max_steps,
            max_tool_calls,
            timeout,
            max_output_tokens,
            max_tokens,
            token_accounting_mode: TokenAccountingMode::default(),
            execution_id: None,
        }
    }

    pub fn with_token_accounting_mode(mut self, mode: TokenAccountingMode) -> Self {
        self.token_accounting_mode = mode;
        self
    }

    pub fn fail_closed(self) -> Self {
        self.with_token_accounting_mode(TokenAccountingMode::FailClosed)
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_generated_execution_id(self) -> Self {
        self.with_execution_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Checks that every ceiling is positive, reporting all violations at once.
    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            ("budget.max_steps", self.max_steps),
            ("budget.max_tool_calls", self.max_tool_calls),
            ("budget.timeout_ms", self.timeout_ms()),
            ("budget.max_output_tokens", self.max_output_tokens),
            ("budget.max_tokens", self.max_tokens),
        ];

        let errors: Vec<ConfigError> = checks
            .into_iter()
            .filter(|(_, value)| *value == 0)
            .map(|(key, _)| ConfigError::InvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(ValidationErrors(errors)))
        }
    }

    /// Reads limits from `budget.*` keys of a configuration provider and validates them.
    ///
    /// ```rust,no_run
    /// use run_budget::BudgetLimits;
    /// use run_budget::config::ConfigBuilder;
    ///
    /// # async fn example() -> Result<(), run_budget::Error> {
    /// let config = ConfigBuilder::new()
    ///     .env_with_prefix("AGENT_")
    ///     .file("budget.json")
    ///     .build();
    /// let limits = BudgetLimits::load(&config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let timeout_ms: u64 = require(provider, "budget.timeout_ms").await?;

        let mut limits = Self::new(
            require(provider, "budget.max_steps").await?,
            require(provider, "budget.max_tool_calls").await?,
            Duration::from_millis(timeout_ms),
            require(provider, "budget.max_output_tokens").await?,
            require(provider, "budget.max_tokens").await?,
        );

        if let Some(raw) = text(provider, "budget.token_accounting_mode").await? {
            limits.token_accounting_mode =
                raw.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "budget.token_accounting_mode".to_string(),
                    message,
                })?;
        }
        limits.execution_id = text(provider, "budget.execution_id").await?;

        limits.validate()?;
        tracing::debug!(
            provider = provider.name(),
            max_steps = limits.max_steps,
            max_tool_calls = limits.max_tool_calls,
            timeout_ms = limits.timeout_ms(),
            max_tokens = limits.max_tokens,
            mode = %limits.token_accounting_mode,
            "Loaded budget limits"
        );
        Ok(limits)
    }
}

async fn require(provider: &dyn ConfigProvider, key: &str) -> ConfigResult<u64> {
    provider
        .get::<u64>(key)
        .await?
        .ok_or_else(|| ConfigError::NotFound {
            key: key.to_string(),
        })
}

// Accepts both bare values (env) and JSON-encoded strings (memory, file).
async fn text(provider: &dyn ConfigProvider, key: &str) -> ConfigResult<Option<String>> {
    Ok(provider.get_raw(key).await?.map(|raw| {
        serde_json::from_str::<String>(&raw).unwrap_or(raw)
    }))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
