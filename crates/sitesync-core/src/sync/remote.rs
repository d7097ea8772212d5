//! Remote apply contract and its HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionKind, OfflineAction};
use crate::util::{compact_text, require_http_url};

/// Per-submission transport flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Overwrite the server state regardless of version
    pub force: bool,
    /// Transport may compress the request
    pub compression: bool,
}

/// Remote verdict on one submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted {
        new_version: Option<String>,
    },
    Conflict {
        server_version: Option<String>,
        server_state: Value,
    },
    Rejected {
        reason: String,
    },
}

/// Applies queued actions on the authoritative remote.
///
/// Transport failures (unreachable host, server errors) are `Error::Network`.
#[async_trait]
pub trait RemoteApply: Send + Sync {
    async fn submit(&self, action: &OfflineAction, options: SubmitOptions) -> Result<SubmitOutcome>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    id: ActionId,
    kind: ActionKind,
    entity_type: &'a str,
    entity_id: &'a str,
    payload: &'a Value,
    enqueued_at: i64,
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AcceptedBody {
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConflictBody {
    server_version: Option<String>,
    #[serde(default)]
    server_state: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// JSON-over-HTTP remote: `POST {base}/v1/actions`.
#[derive(Clone)]
pub struct HttpRemote {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Network(error.to_string()))?;

        Ok(Self {
            endpoint: format!("{base}/v1/actions"),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteApply for HttpRemote {
    async fn submit(&self, action: &OfflineAction, options: SubmitOptions) -> Result<SubmitOutcome> {
        let body = SubmitRequest {
            id: action.id,
            kind: action.kind,
            entity_type: &action.entity_type,
            entity_id: &action.entity_id,
            payload: &action.payload,
            enqueued_at: action.enqueued_at,
            force: options.force,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .header("Idempotency-Key", action.id.as_str())
            .json(&body);
        if options.compression {
            request = request.header("Accept-Encoding", "gzip");
        }

        let response = request
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        classify_response(status, &text)
    }
}

fn classify_response(status: StatusCode, body: &str) -> Result<SubmitOutcome> {
    if status.is_success() {
        let accepted = serde_json::from_str::<AcceptedBody>(body).unwrap_or_default();
        return Ok(SubmitOutcome::Accepted {
            new_version: accepted.version,
        });
    }

    if status == StatusCode::CONFLICT {
        let conflict = serde_json::from_str::<ConflictBody>(body).unwrap_or_default();
        return Ok(SubmitOutcome::Conflict {
            server_version: conflict.server_version,
            server_state: conflict.server_state,
        });
    }

    if status.is_client_error() {
        return Ok(SubmitOutcome::Rejected {
            reason: parse_api_error(status, body),
        });
    }

    Err(Error::Network(parse_api_error(status, body)))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    require_http_url(raw, "remote URL")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn base_url_is_validated() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("sync.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://sync.example.com/ ".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn endpoint_appends_actions_path() {
        let remote = HttpRemote::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(remote.endpoint(), "http://localhost:8080/v1/actions");
    }

    #[test]
    fn success_is_accepted() {
        assert_eq!(
            classify_response(StatusCode::OK, r#"{"version":"v9"}"#).unwrap(),
            SubmitOutcome::Accepted {
                new_version: Some("v9".to_string())
            }
        );
        assert_eq!(
            classify_response(StatusCode::NO_CONTENT, "").unwrap(),
            SubmitOutcome::Accepted { new_version: None }
        );
    }

    #[test]
    fn conflict_carries_server_state() {
        let outcome = classify_response(
            StatusCode::CONFLICT,
            r#"{"server_version":"v3","server_state":{"status":"closed"}}"#,
        )
        .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Conflict {
                server_version: Some("v3".to_string()),
                server_state: json!({"status": "closed"}),
            }
        );
    }

    #[test]
    fn client_errors_are_rejections_and_server_errors_are_transient() {
        let rejected =
            classify_response(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"bad field"}"#)
                .unwrap();
        assert_eq!(
            rejected,
            SubmitOutcome::Rejected {
                reason: "bad field (422)".to_string()
            }
        );

        let error = classify_response(StatusCode::BAD_GATEWAY, "").unwrap_err();
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "Network error: HTTP 502");
    }
}
