use crate::error::{self, AgentError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The model could not be reached or refused the request.
    #[error("query failed: {0}")]
    Query(String),

    /// The reply could not be turned into the requested type.
    #[error("cannot convert reply to {target}: {source}")]
    Conversion {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A query input could not be serialized to JSON.
    #[error("cannot serialize query input: {0}")]
    Input(#[source] serde_json::Error),

    #[error("cannot unwrap model as {0}")]
    UnsupportedUnwrap(&'static str),
}

impl LlmError {
    pub fn query(msg: impl Into<String>) -> Self {
        LlmError::Query(msg.into())
    }
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::new(&error::LLM, e.to_string()).with_source(e)
    }
}

/// The facade phase methods use to talk to a language model.
///
/// Implementations wrap a vendor client. Only `query_with` and `as_any` are
/// required; typed queries and unwrapping are provided on
/// `dyn LargeLanguageModel`.
pub trait LargeLanguageModel: Send + Sync {
    /// Send `prompt` with serialized `inputs` attached and return the reply.
    fn query_with(&self, prompt: &str, inputs: &[serde_json::Value]) -> Result<String, LlmError>;

    fn query(&self, prompt: &str) -> Result<String, LlmError> {
        self.query_with(prompt, &[])
    }

    /// The concrete implementation, handed out by `unwrap`.
    fn as_any(&self) -> &dyn Any;
}

impl dyn LargeLanguageModel + '_ {
    /// Query and parse the reply as JSON into `T`.
    pub fn query_as<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, LlmError> {
        self.query_as_with(prompt, &[])
    }

    pub fn query_as_with<T: DeserializeOwned>(
        &self,
        prompt: &str,
        inputs: &[serde_json::Value],
    ) -> Result<T, LlmError> {
        let reply = self.query_with(prompt, inputs)?;
        parse_reply(&reply)
    }

    /// Serialize each domain object in `inputs` and attach it to the query.
    pub fn query_with_inputs<I: Serialize>(
        &self,
        prompt: &str,
        inputs: &[I],
    ) -> Result<String, LlmError> {
        self.query_with(prompt, &serialize_inputs(inputs)?)
    }

    pub fn query_as_with_inputs<T: DeserializeOwned, I: Serialize>(
        &self,
        prompt: &str,
        inputs: &[I],
    ) -> Result<T, LlmError> {
        self.query_as_with(prompt, &serialize_inputs(inputs)?)
    }

    /// Reach the vendor implementation behind the facade.
    pub fn unwrap<T: Any>(&self) -> Result<&T, LlmError> {
        self.as_any()
            .downcast_ref::<T>()
            .ok_or(LlmError::UnsupportedUnwrap(std::any::type_name::<T>()))
    }
}

fn serialize_inputs<I: Serialize>(inputs: &[I]) -> Result<Vec<serde_json::Value>, LlmError> {
    inputs
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .map_err(LlmError::Input)
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, LlmError> {
    let body = strip_code_fences(reply);
    match serde_json::from_str(&body) {
        Ok(v) => Ok(v),
        // Bare text asked for as a string.
        Err(e) => serde_json::from_value(serde_json::Value::String(body)).map_err(|_| {
            LlmError::Conversion {
                target: std::any::type_name::<T>(),
                source: e,
            }
        }),
    }
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    // Skip the opening fence (```json) and the closing one if present.
    let end = if lines.len() > 1 && lines[lines.len() - 1].trim_start().starts_with("```") {
        lines.len() - 1
    } else {
        lines.len()
    };
    lines[1.min(end)..end].join("\n")
}
