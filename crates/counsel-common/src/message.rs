use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Reported when `system` or `user_input` is missing or blank.
pub const MISSING_FIELDS_MESSAGE: &str = "system과 user_input 필드는 필수입니다.";

/// Raw request frame as sent by the chat client.
///
/// Every field is optional at this layer; [`ClientRequest::validate`] turns it
/// into a [`CounselRequest`] or a recoverable validation error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "deserialize_temperature")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Values used when a request leaves an optional field out.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub model: String,
    pub temperature: f64,
    pub user_id: String,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            user_id: "anonymous".to_string(),
        }
    }
}

/// A validated request ready for the counseling runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct CounselRequest {
    pub model: String,
    pub temperature: f64,
    pub system: String,
    pub user_input: String,
    pub user_id: String,
}

impl ClientRequest {
    /// Parse a text frame. Malformed JSON is a validation error, not a fatal one.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Validation(format!("malformed request: {e}")))
    }

    pub fn validate(self, defaults: &RequestDefaults) -> Result<CounselRequest> {
        let system = non_blank(self.system);
        let user_input = non_blank(self.user_input);
        let (Some(system), Some(user_input)) = (system, user_input) else {
            return Err(Error::Validation(MISSING_FIELDS_MESSAGE.to_string()));
        };

        let temperature = self.temperature.unwrap_or(defaults.temperature);
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(Error::Validation(format!(
                "temperature must be between 0 and 2, got {temperature}"
            )));
        }

        Ok(CounselRequest {
            model: non_blank(self.model).unwrap_or_else(|| defaults.model.clone()),
            temperature,
            system,
            user_input,
            user_id: non_blank(self.user_id).unwrap_or_else(|| defaults.user_id.clone()),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts `0.3`, `"0.3"`, or `null`.
fn deserialize_temperature<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("temperature is not a number: {s}"))),
    }
}

/// Events pushed to the client. A reply is zero or more `Chunk`s followed by
/// exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEvent {
    Chunk { chunk: String },
    Done { done: bool, content: String },
    Error { error: String },
}

impl ServerEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { chunk: text.into() }
    }

    pub fn done(content: impl Into<String>) -> Self {
        Self::Done {
            done: true,
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_string_temperature() {
        let req = ClientRequest::parse(
            r#"{"model":"gpt-4o","temperature":"0.3","system":"상담가","user_input":"안녕하세요"}"#,
        )
        .unwrap();
        assert_eq!(req.temperature, Some(0.3));

        let validated = req.validate(&RequestDefaults::default()).unwrap();
        assert_eq!(validated.model, "gpt-4o");
        assert_eq!(validated.user_id, "anonymous");
    }

    #[test]
    fn accepts_numeric_temperature_and_user_id() {
        let validated = ClientRequest::parse(
            r#"{"temperature":0.3,"system":"s","user_input":"hi","user_id":"u1"}"#,
        )
        .unwrap()
        .validate(&RequestDefaults::default())
        .unwrap();
        assert_eq!(validated.temperature, 0.3);
        assert_eq!(validated.user_id, "u1");
    }

    #[test]
    fn missing_system_is_validation_error() {
        let err = ClientRequest::parse(r#"{"user_input":"hi"}"#)
            .unwrap()
            .validate(&RequestDefaults::default())
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains(MISSING_FIELDS_MESSAGE));
    }

    #[test]
    fn blank_user_input_is_validation_error() {
        let err = ClientRequest::parse(r#"{"system":"s","user_input":"   "}"#)
            .unwrap()
            .validate(&RequestDefaults::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn malformed_json_is_recoverable() {
        assert!(ClientRequest::parse("{not json").unwrap_err().is_recoverable());
        assert!(
            ClientRequest::parse(r#"{"temperature":"warm","system":"s","user_input":"x"}"#)
                .unwrap_err()
                .is_recoverable()
        );
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let err = ClientRequest::parse(r#"{"temperature":3.5,"system":"s","user_input":"x"}"#)
            .unwrap()
            .validate(&RequestDefaults::default())
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn server_events_serialize_to_wire_shape() {
        assert_eq!(ServerEvent::chunk("안").to_json().unwrap(), r#"{"chunk":"안"}"#);
        assert_eq!(
            ServerEvent::done("full").to_json().unwrap(),
            r#"{"done":true,"content":"full"}"#
        );
        assert_eq!(ServerEvent::error("boom").to_json().unwrap(), r#"{"error":"boom"}"#);
    }

    #[test]
    fn server_events_parse_back() {
        let event: ServerEvent = serde_json::from_str(r#"{"done":true,"content":"hi"}"#).unwrap();
        assert_eq!(event, ServerEvent::done("hi"));
        let event: ServerEvent = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert_eq!(event, ServerEvent::error("x"));
    }
}
