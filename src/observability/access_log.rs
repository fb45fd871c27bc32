//! Per-request access logging.
//!
//! One JSON object per line. Writes are serialized through a Mutex so
//! records never interleave; sink errors are logged and never fail the
//! request that produced them.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::model::AccessLogPolicy;

/// One completed L7 request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    pub time: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: u16,
    pub duration_ms: u64,
    pub remote_ip: String,
    pub user_agent: String,
    pub referer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub upstream: String,
    pub bytes_written: u64,
}

#[derive(Clone)]
pub struct AccessLogger {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl AccessLogger {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(std::io::stdout()))
    }

    pub fn from_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Emit one record, subject to the policy's sampling probability and
    /// field allow-list.
    pub fn log(&self, record: &AccessRecord, policy: &AccessLogPolicy) {
        if policy.sampling < 1.0 && rand::random::<f64>() > policy.sampling {
            return;
        }
        let line = if policy.fields.is_empty() {
            serde_json::to_string(record)
        } else {
            serde_json::to_value(record).map(|value| {
                let mut filtered = serde_json::Map::new();
                if let serde_json::Value::Object(full) = value {
                    for (key, val) in full {
                        if policy.fields.iter().any(|f| f == &key) {
                            filtered.insert(key, val);
                        }
                    }
                }
                serde_json::Value::Object(filtered).to_string()
            })
        };
        match line {
            Ok(line) => {
                let mut sink = self.sink.lock().expect("access log sink poisoned");
                if let Err(err) = writeln!(sink, "{line}") {
                    tracing::warn!(error = %err, "access log write failed");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "access log encode failed");
            }
        }
    }
}
