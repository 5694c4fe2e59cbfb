use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use tooloop_core::error::DecodeError;

/// Turns the model's final text into the caller's result type.
pub trait OutputDecoder<T>: Send + Sync {
    fn decode(&self, text: &str) -> Result<T, DecodeError>;
}

/// Passes the final text through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl OutputDecoder<String> for TextDecoder {
    fn decode(&self, text: &str) -> Result<String, DecodeError> {
        Ok(text.to_string())
    }
}

/// Parses the final text as JSON, tolerating a surrounding markdown code fence.
pub struct JsonDecoder<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _target: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> OutputDecoder<T> for JsonDecoder<T> {
    fn decode(&self, text: &str) -> Result<T, DecodeError> {
        Ok(serde_json::from_str(strip_code_fence(text))?)
    }
}

impl<T, F> OutputDecoder<T> for F
where
    F: Fn(&str) -> Result<T, DecodeError> + Send + Sync,
{
    fn decode(&self, text: &str) -> Result<T, DecodeError> {
        self(text)
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
