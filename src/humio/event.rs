use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("line is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing field {0}")]
    MissingField(&'static str),
}

/// One event as it is shipped to the ingest endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    /// Raw mode: the provider line, unmodified
    Raw(String),
    /// Enrich mode: timestamped record with flattened attributes
    Structured(StructuredEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredEvent {
    pub timestamp: Value,
    pub rawstring: String,
    pub attributes: Map<String, Value>,
}

/// A decoded line plus the provider offset it was read at, when known.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event: Event,
    pub offset: Option<u64>,
}

#[derive(Deserialize)]
struct OffsetProbe {
    metadata: MetadataProbe,
}

#[derive(Deserialize)]
struct MetadataProbe {
    offset: u64,
}

/// Turns provider lines into shippable events.
#[derive(Debug, Clone)]
pub enum EventDecoder {
    Raw,
    Enrich { metadata: Map<String, Value> },
}

impl EventDecoder {
    /// Enrich decoder stamping every event with the shipping host and stream name.
    pub fn enrich(host: &str, stream: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("@host".to_string(), Value::String(host.to_string()));
        metadata.insert("@stream".to_string(), Value::String(stream.to_string()));
        EventDecoder::Enrich { metadata }
    }

    pub fn is_enrich(&self) -> bool {
        matches!(self, EventDecoder::Enrich { .. })
    }

    pub fn decode(&self, line: &[u8]) -> Result<DecodedEvent, DecodeError> {
        let text = std::str::from_utf8(line)?;
        let text = text.strip_suffix('\r').unwrap_or(text);

        match self {
            EventDecoder::Raw => Ok(DecodedEvent {
                offset: serde_json::from_str::<OffsetProbe>(text)
                    .ok()
                    .map(|probe| probe.metadata.offset),
                event: Event::Raw(text.to_string()),
            }),
            EventDecoder::Enrich { metadata } => enrich(text, metadata),
        }
    }
}

fn enrich(text: &str, static_metadata: &Map<String, Value>) -> Result<DecodedEvent, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut record) = value else {
        return Err(DecodeError::MissingField("metadata"));
    };

    let metadata = record
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingField("metadata"))?;
    let timestamp = metadata
        .get("eventCreationTime")
        .cloned()
        .ok_or(DecodeError::MissingField("metadata.eventCreationTime"))?;
    let offset = metadata
        .get("offset")
        .and_then(Value::as_u64)
        .ok_or(DecodeError::MissingField("metadata.offset"))?;

    if let Some(event) = record.get_mut("event").and_then(Value::as_object_mut) {
        flatten_audit_key_values(event);
    }

    let mut attributes = static_metadata.clone();
    attributes.extend(record);

    Ok(DecodedEvent {
        event: Event::Structured(StructuredEvent {
            timestamp,
            rawstring: text.to_string(),
            attributes,
        }),
        offset: Some(offset),
    })
}

/// Lift `AuditKeyValues: [{"Key": k, "ValueString": v}, ...]` into `k: v` fields.
fn flatten_audit_key_values(event: &mut Map<String, Value>) {
    let Some(Value::Array(pairs)) = event.remove("AuditKeyValues") else {
        return;
    };

    for pair in pairs {
        let key = pair.get("Key").and_then(Value::as_str);
        let value = pair.get("ValueString");
        if let (Some(key), Some(value)) = (key, value) {
            event.insert(key.to_string(), value.clone());
        }
    }
}
