//! Response envelope delivered to the caller for every completed request.
//!
//! Wire format (one JSON object per request):
//!
//! ```text
//! { "callbackJSON": "...", "transId": "...", "error": "...",
//!   "data": [[...], ...], "metadata": { "rowIdMap": {...}, "elementKeyMap": {...} } }
//! ```
//!
//! Absent keys are omitted. An envelope carrying `error` never carries `data`
//! or `metadata`; the constructors and the deserializer both enforce this.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Row-field arrays of a query result.
pub type ResponseData = Vec<Vec<JsonValue>>;

/// Free-form metadata object of a query result.
pub type ResponseMetadata = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct ResponseEnvelope {
    #[serde(rename = "callbackJSON")]
    callback: String,
    #[serde(rename = "transId", skip_serializing_if = "Option::is_none")]
    trans_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<ResponseMetadata>,
}

impl ResponseEnvelope {
    /// Build a success envelope.
    pub fn success(
        callback: impl Into<String>,
        trans_id: Option<String>,
        data: Option<ResponseData>,
        metadata: Option<ResponseMetadata>,
    ) -> Self {
        Self {
            callback: callback.into(),
            trans_id,
            error: None,
            data,
            metadata,
        }
    }

    /// Build an error envelope.
    pub fn failure(
        callback: impl Into<String>,
        trans_id: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            callback: callback.into(),
            trans_id,
            error: Some(error.into()),
            data: None,
            metadata: None,
        }
    }

    pub fn callback(&self) -> &str {
        &self.callback
    }

    /// Transaction id, present only while the transaction remains open.
    pub fn trans_id(&self) -> Option<&str> {
        self.trans_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn data(&self) -> Option<&ResponseData> {
        self.data.as_ref()
    }

    pub fn metadata(&self) -> Option<&ResponseMetadata> {
        self.metadata.as_ref()
    }

    /// Serialize to the single-line JSON form handed to the host surface.
    pub fn to_json(&self) -> String {
        // Only strings, maps and JSON values: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "callbackJSON")]
    callback: String,
    #[serde(rename = "transId", default)]
    trans_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ResponseData>,
    #[serde(default)]
    metadata: Option<ResponseMetadata>,
}

impl TryFrom<RawEnvelope> for ResponseEnvelope {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        if raw.error.is_some() && (raw.data.is_some() || raw.metadata.is_some()) {
            return Err("envelope carries both error and data/metadata".to_string());
        }
        Ok(Self {
            callback: raw.callback,
            trans_id: raw.trans_id,
            error: raw.error,
            data: raw.data,
            metadata: raw.metadata,
        })
    }
}
