//! Wire envelope
//!
//! Every message crossing the boundary is `{"event": string, "id"?: string, "data"?: any}`.
//! A frame on the wire holds either one envelope or a JSON array of them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{BridgeError, BridgeResult};

/// Reserved event names
pub mod events {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const QUERY: &str = "query";
    pub const DELETE: &str = "delete";
    pub const UPDATE_INTERESTS: &str = "updateInterests";

    pub const CREATED: &str = "created";
    pub const DESTROYED: &str = "destroyed";
    pub const CALLBACK: &str = "callback";
    pub const ERROR: &str = "error";
    pub const RESOURCE_LOADED: &str = "resourceLoaded";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            id: None,
            data: None,
        }
    }

    /// Envelope addressed to (or originating from) an object
    pub fn for_object(id: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self::new(event).with_id(id).with_data(data)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = if data.is_null() { None } else { Some(data) };
        self
    }

    /// Failure report correlated to `request`
    pub fn failure(request: &Envelope, error: &BridgeError) -> Self {
        let mut data = json!({
            "code": error.code(),
            "message": error.to_string(),
            "request": request.event,
        });
        if let Some(token) = request.callback_id() {
            data["callbackId"] = token.clone();
        }
        let envelope = Self::new(events::ERROR).with_data(data);
        match &request.id {
            Some(id) => envelope.with_id(id.clone()),
            None => envelope,
        }
    }

    /// Correlation token carried as `data.callbackId`
    pub fn callback_id(&self) -> Option<&Value> {
        self.data.as_ref()?.get("callbackId")
    }

    pub fn require_id(&self) -> BridgeResult<&str> {
        self.id.as_deref().filter(|id| !id.is_empty()).ok_or_else(|| {
            BridgeError::MalformedEnvelope(format!("`{}` envelope requires an id", self.event))
        })
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub(crate) fn from_value(value: Value) -> BridgeResult<Self> {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;
        if envelope.event.is_empty() {
            return Err(BridgeError::MalformedEnvelope("empty event name".into()));
        }
        Ok(envelope)
    }
}

/// Parse one wire frame into envelopes.
///
/// A batch is parsed element by element so one malformed entry does not
/// discard its neighbours.
pub fn parse_frame(text: &str) -> Vec<BridgeResult<Envelope>> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return vec![Err(BridgeError::MalformedEnvelope(e.to_string()))],
    };
    match value {
        Value::Array(items) => items.into_iter().map(Envelope::from_value).collect(),
        other => vec![Envelope::from_value(other)],
    }
}

/// Serialize envelopes into wire frames: one array when `batch` is set,
/// otherwise one frame per envelope.
pub fn encode_frames(envelopes: &[Envelope], batch: bool) -> serde_json::Result<Vec<String>> {
    if envelopes.is_empty() {
        return Ok(Vec::new());
    }
    if batch {
        return Ok(vec![serde_json::to_string(envelopes)?]);
    }
    envelopes.iter().map(Envelope::to_json_string).collect()
}
