use std::fmt::{Display, Formatter};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::EnvelopeMeta;

/// Request identifier (UUID v4) for tracking one command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Per-command metadata collected while the command runs.
#[derive(Debug, Clone)]
pub struct Metadata {
    request_id: RequestId,
    schema_version: &'static str,
    started: Instant,
    run_id: Option<Uuid>,
    warnings: Vec<String>,
}

impl Metadata {
    pub fn start(schema_version: &'static str) -> Self {
        Self {
            request_id: RequestId::new_v4(),
            schema_version,
            started: Instant::now(),
            run_id: None,
            warnings: Vec::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn set_run_id(&mut self, run_id: Uuid) {
        self.run_id = Some(run_id);
    }

    pub fn extend_warnings(&mut self, warnings: impl IntoIterator<Item = String>) {
        self.warnings.extend(warnings);
    }

    /// Freezes the metadata; latency is measured up to this call.
    pub fn into_envelope_meta(self) -> EnvelopeMeta {
        let latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut meta = EnvelopeMeta::new(self.request_id.to_string(), self.schema_version, latency_ms);
        meta.run_id = self.run_id.map(|id| id.hyphenated().to_string());
        for warning in self.warnings {
            meta.push_warning(warning);
        }
        meta
    }
}
