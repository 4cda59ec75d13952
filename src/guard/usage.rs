//! Request and response shapes the guard understands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MAX_OUTPUT_TOKENS: &str = "max_output_tokens";

/// Reads a JSON number as a token count. Fractional counts round up; strings,
/// negatives and non-finite values are not counts.
fn token_count(value: &Value) -> Option<u64> {
    if let Some(count) = value.as_u64() {
        return Some(count);
    }
    let count = value.as_f64()?;
    (count.is_finite() && count >= 0.0).then(|| count.ceil() as u64)
}

/// Request parameters carrying an optional per-call output-token cap.
pub trait ResponseParams: Clone {
    fn max_output_tokens(&self) -> Option<u64>;

    fn set_max_output_tokens(&mut self, tokens: u64);
}

impl ResponseParams for Map<String, Value> {
    fn max_output_tokens(&self) -> Option<u64> {
        self.get(MAX_OUTPUT_TOKENS).and_then(token_count)
    }

    fn set_max_output_tokens(&mut self, tokens: u64) {
        self.insert(MAX_OUTPUT_TOKENS.to_string(), Value::from(tokens));
    }
}

impl ResponseParams for Value {
    fn max_output_tokens(&self) -> Option<u64> {
        self.get(MAX_OUTPUT_TOKENS).and_then(token_count)
    }

    // Non-object params carry no fields worth keeping; they become an object
    // holding only the cap.
    fn set_max_output_tokens(&mut self, tokens: u64) {
        match self {
            Value::Object(map) => map.set_max_output_tokens(tokens),
            other => {
                let mut map = Map::new();
                map.set_max_output_tokens(tokens);
                *other = Value::Object(map);
            }
        }
    }
}

/// Token usage as reported by a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
}

impl ResponseUsage {
    pub fn total(tokens: u64) -> Self {
        Self {
            total_tokens: Some(tokens),
            ..Default::default()
        }
    }

    pub fn split(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            ..Default::default()
        }
    }

    /// Tokens charged for the call: the combined total when present,
    /// otherwise prompt plus completion, otherwise unknown.
    pub fn delta_tokens(&self) -> Option<u64> {
        match (self.total_tokens, self.prompt_tokens, self.completion_tokens) {
            (Some(total), _, _) => Some(total),
            (None, Some(prompt), Some(completion)) => Some(prompt.saturating_add(completion)),
            _ => None,
        }
    }
}

/// Responses that may report token usage.
pub trait UsageSource {
    fn usage(&self) -> Option<ResponseUsage>;
}

impl UsageSource for ResponseUsage {
    fn usage(&self) -> Option<ResponseUsage> {
        Some(*self)
    }
}

impl<T: UsageSource> UsageSource for Option<T> {
    fn usage(&self) -> Option<ResponseUsage> {
        self.as_ref().and_then(UsageSource::usage)
    }
}

/// Reads the `usage` object. Fields that are not token counts count as absent.
impl UsageSource for Value {
    fn usage(&self) -> Option<ResponseUsage> {
        let usage = self.get("usage")?.as_object()?;
        let field = |name: &str| usage.get(name).and_then(token_count);
        Some(ResponseUsage {
            total_tokens: field("total_tokens"),
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
        })
    }
}
