//! Machine-readable command output.
//!
//! Every command prints exactly one [`Envelope`] on stdout. With `--stream`
//! the run command prints NDJSON events instead, ending with the envelope
//! as a `chunk` event.

pub mod stream_writer;

use std::io::{self, Write};

use coincast_core::UtcDateTime;
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub meta: EnvelopeMeta,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}

impl<T> Envelope<T> {
    pub fn with_errors(meta: EnvelopeMeta, data: T, errors: Vec<EnvelopeError>) -> Self {
        Self { meta, data, errors }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub schema_version: String,
    pub generated_at: UtcDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl EnvelopeMeta {
    pub fn new(
        request_id: impl Into<String>,
        schema_version: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            schema_version: schema_version.into(),
            generated_at: UtcDateTime::now(),
            run_id: None,
            latency_ms,
            warnings: Vec::new(),
        }
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl EnvelopeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

pub fn render<T: Serialize>(envelope: &Envelope<T>, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    write_envelope(&mut stdout.lock(), envelope, pretty)
}

pub fn write_envelope<W: Write, T: Serialize>(
    writer: &mut W,
    envelope: &Envelope<T>,
    pretty: bool,
) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    writeln!(writer, "{payload}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn empty_errors_are_omitted() {
        let meta = EnvelopeMeta::new("req-00000001", "coincast.models.v1", 3);
        let envelope = Envelope::with_errors(meta, json!(["naive"]), Vec::new());

        let mut sink = Vec::new();
        write_envelope(&mut sink, &envelope, false).expect("writes");
        let value: Value = serde_json::from_slice(&sink).expect("json");

        assert!(value.get("errors").is_none());
        assert!(value["meta"].get("run_id").is_none());
        assert_eq!(value["meta"]["latency_ms"], 3);
        assert_eq!(value["data"][0], "naive");
    }

    #[test]
    fn errors_are_listed_with_codes() {
        let meta = EnvelopeMeta::new("req-00000002", "coincast.validate.v1", 0);
        let envelope = Envelope::with_errors(
            meta,
            json!({ "valid": false }),
            vec![EnvelopeError::new("parameters.invalid", "at least one asset must be selected")],
        );

        let mut sink = Vec::new();
        write_envelope(&mut sink, &envelope, true).expect("writes");
        let value: Value = serde_json::from_slice(&sink).expect("json");

        assert_eq!(value["errors"][0]["code"], "parameters.invalid");
        assert!(value["errors"][0].get("retryable").is_none());
    }
}
