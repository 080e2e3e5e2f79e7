//! The `{success, data | error}` envelope spoken between relay and agent backend.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Normalized outcome of one agent invocation.
///
/// Exactly one of payload or error exists by construction; the wire form is
/// `{"success":true,"data":...}` or `{"success":false,"error":"..."}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    Success { data: Value },
    Failure { error: String },
}

impl ResponseEnvelope {
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Failure { error } => Err(error),
        }
    }
}

#[derive(Serialize)]
struct WireOut<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireIn {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Serialize for ResponseEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Success { data } => WireOut {
                success: true,
                data: Some(data),
                error: None,
            },
            Self::Failure { error } => WireOut {
                success: false,
                data: None,
                error: Some(error),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResponseEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireIn::deserialize(deserializer)?;
        if wire.success {
            if wire.error.is_some() {
                return Err(D::Error::custom(
                    "envelope carries both success and an error",
                ));
            }
            return Ok(Self::Success {
                data: wire.data.unwrap_or(Value::Null),
            });
        }

        let error = match wire.error {
            Some(Value::String(text)) => text,
            Some(Value::Null) | None => "Agent backend reported failure without detail".to_string(),
            Some(other) => other.to_string(),
        };
        Ok(Self::Failure { error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        assert_eq!(
            serde_json::to_value(ResponseEnvelope::success(json!({"tokenId": "0.0.5"})))
                .expect("json"),
            json!({"success": true, "data": {"tokenId": "0.0.5"}})
        );
        assert_eq!(
            serde_json::to_value(ResponseEnvelope::failure("insufficient balance")).expect("json"),
            json!({"success": false, "error": "insufficient balance"})
        );
    }

    #[test]
    fn missing_data_is_null() {
        let env: ResponseEnvelope =
            serde_json::from_value(json!({"success": true})).expect("parse");
        assert_eq!(env, ResponseEnvelope::success(Value::Null));
    }

    #[test]
    fn failure_without_text_gets_placeholder() {
        let env: ResponseEnvelope =
            serde_json::from_value(json!({"success": false})).expect("parse");
        assert!(env.into_result().unwrap_err().contains("without detail"));
    }

    #[test]
    fn structured_error_is_stringified() {
        let env: ResponseEnvelope =
            serde_json::from_value(json!({"success": false, "error": {"code": 7}})).expect("parse");
        assert_eq!(env, ResponseEnvelope::failure(r#"{"code":7}"#));
    }

    #[test]
    fn contradictory_envelope_is_rejected() {
        let parsed = serde_json::from_value::<ResponseEnvelope>(
            json!({"success": true, "data": 1, "error": "x"}),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_success_flag_is_rejected() {
        assert!(serde_json::from_value::<ResponseEnvelope>(json!({"data": 1})).is_err());
    }
}
