//! Wire envelope for front end <-> companion communication.
//!
//! The host channel only carries flat documents of string keys to string
//! values. Every message is one of two envelopes:
//! - **Call**: `Operation`, `Method`, `ReturnID`, `Input`, `Ui`
//! - **Return**: `Operation`, `ReturnID`, `Input`, `Err`
//!
//! Structured payloads travel as JSON text under `Input`; an empty string
//! stands for an empty document.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const KEY_OPERATION: &str = "Operation";
pub const KEY_METHOD: &str = "Method";
pub const KEY_RETURN_ID: &str = "ReturnID";
pub const KEY_INPUT: &str = "Input";
pub const KEY_ERROR: &str = "Err";
pub const KEY_UI: &str = "Ui";
/// Older front ends wrap an entire call as JSON text under this key.
pub const KEY_LEGACY_VALUE: &str = "Value";

/// Structured payload carried by an envelope.
pub type Document = Map<String, Value>;

/// Flat string-keyed document handed to the host channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireDocument(BTreeMap<String, String>);

impl WireDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    fn require(&self, key: &'static str) -> Result<&str, DecodeError> {
        self.get(key).ok_or(DecodeError::MissingField(key))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WireDocument {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for WireDocument {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("unknown operation {0:?}")]
    UnknownOperation(String),

    #[error("invalid {field} payload: {source}")]
    InvalidPayload {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} payload must be a JSON object")]
    PayloadNotObject { field: &'static str },

    #[error("invalid {field} flag {value:?}")]
    InvalidFlag { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Call,
    Return,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "Call",
            Self::Return => "Return",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Call" => Ok(Self::Call),
            "Return" => Ok(Self::Return),
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub method: String,
    /// Empty for fire-and-forget calls.
    pub correlation_id: String,
    pub input: Document,
    /// Callee must run the handler on its designated execution context.
    pub ui_affinity: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnEnvelope {
    pub correlation_id: String,
    pub output: Document,
    /// Empty when the call succeeded.
    pub error: String,
}

impl ReturnEnvelope {
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(CallEnvelope),
    Return(ReturnEnvelope),
}

impl Envelope {
    pub fn call(
        method: impl Into<String>,
        correlation_id: impl Into<String>,
        input: Document,
        ui_affinity: bool,
    ) -> Self {
        Self::Call(CallEnvelope {
            method: method.into(),
            correlation_id: correlation_id.into(),
            input,
            ui_affinity,
        })
    }

    pub fn reply(
        correlation_id: impl Into<String>,
        output: Option<Document>,
        error: impl Into<String>,
    ) -> Self {
        Self::Return(ReturnEnvelope {
            correlation_id: correlation_id.into(),
            output: output.unwrap_or_default(),
            error: error.into(),
        })
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Call(_) => Operation::Call,
            Self::Return(_) => Operation::Return,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Call(call) => &call.correlation_id,
            Self::Return(ret) => &ret.correlation_id,
        }
    }

    /// Encode into the flat wire shape, omitting fields the operation does not use.
    pub fn encode(&self) -> WireDocument {
        let mut doc = WireDocument::new();
        doc.insert(KEY_OPERATION, self.operation().as_str());
        match self {
            Self::Call(call) => {
                doc.insert(KEY_METHOD, call.method.as_str());
                if !call.correlation_id.is_empty() {
                    doc.insert(KEY_RETURN_ID, call.correlation_id.as_str());
                }
                doc.insert(KEY_INPUT, encode_document(&call.input));
                doc.insert(KEY_UI, if call.ui_affinity { "true" } else { "false" });
            }
            Self::Return(ret) => {
                doc.insert(KEY_RETURN_ID, ret.correlation_id.as_str());
                doc.insert(KEY_INPUT, encode_document(&ret.output));
                doc.insert(KEY_ERROR, ret.error.as_str());
            }
        }
        doc
    }

    pub fn decode(doc: &WireDocument) -> Result<Self, DecodeError> {
        if !doc.contains_key(KEY_OPERATION)
            && let Some(value) = doc.get(KEY_LEGACY_VALUE)
        {
            return decode_legacy_call(value);
        }

        let operation: Operation = doc.require(KEY_OPERATION)?.parse()?;
        let input = decode_document(KEY_INPUT, doc.get(KEY_INPUT).unwrap_or_default())?;

        match operation {
            Operation::Call => {
                let method = doc.require(KEY_METHOD)?;
                if method.is_empty() {
                    return Err(DecodeError::MissingField(KEY_METHOD));
                }
                Ok(Self::Call(CallEnvelope {
                    method: method.to_string(),
                    correlation_id: doc.get(KEY_RETURN_ID).unwrap_or_default().to_string(),
                    input,
                    ui_affinity: parse_flag(KEY_UI, doc.get(KEY_UI).unwrap_or_default())?,
                }))
            }
            Operation::Return => Ok(Self::Return(ReturnEnvelope {
                correlation_id: doc.require(KEY_RETURN_ID)?.to_string(),
                output: input,
                error: doc.get(KEY_ERROR).unwrap_or_default().to_string(),
            })),
        }
    }
}

impl From<&Envelope> for WireDocument {
    fn from(envelope: &Envelope) -> Self {
        envelope.encode()
    }
}

impl TryFrom<&WireDocument> for Envelope {
    type Error = DecodeError;

    fn try_from(doc: &WireDocument) -> Result<Self, Self::Error> {
        Self::decode(doc)
    }
}

fn encode_document(document: &Document) -> String {
    if document.is_empty() {
        return String::new();
    }
    Value::Object(document.clone()).to_string()
}

fn decode_document(field: &'static str, text: &str) -> Result<Document, DecodeError> {
    if text.trim().is_empty() {
        return Ok(Document::new());
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|source| DecodeError::InvalidPayload { field, source })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Document::new()),
        _ => Err(DecodeError::PayloadNotObject { field }),
    }
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, DecodeError> {
    if value.is_empty() || value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else {
        Err(DecodeError::InvalidFlag {
            field,
            value: value.to_string(),
        })
    }
}

/// `{"ReturnID": "...", "Method": "...", "Input": {...}}` as JSON text.
fn decode_legacy_call(text: &str) -> Result<Envelope, DecodeError> {
    let mut request = decode_document(KEY_LEGACY_VALUE, text)?;

    let correlation_id = match request.remove(KEY_RETURN_ID) {
        Some(Value::String(id)) => id,
        _ => return Err(DecodeError::MissingField(KEY_RETURN_ID)),
    };
    let method = match request.remove(KEY_METHOD) {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => return Err(DecodeError::MissingField(KEY_METHOD)),
    };
    let input = match request.remove(KEY_INPUT) {
        None | Some(Value::Null) => Document::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(DecodeError::PayloadNotObject { field: KEY_INPUT }),
    };
    let ui_affinity = matches!(request.get(KEY_UI), Some(Value::Bool(true)));

    Ok(Envelope::Call(CallEnvelope {
        method,
        correlation_id,
        input,
        ui_affinity,
    }))
}
