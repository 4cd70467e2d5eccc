//! Status query over the progress ledger.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use kbsync_types::Identity;

use crate::ledger::{ProgressLedger, TenantProgress};

/// Request for one tenant's progress records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
}

impl StatusRequest {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            org_id: Some(org_id.into()),
        }
    }

    fn identity(&self) -> Option<Identity> {
        match (self.user_id.as_deref(), self.org_id.as_deref()) {
            (Some(user), Some(org)) if !user.is_empty() && !org.is_empty() => {
                Some(Identity::new(user, org))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<TenantProgress>,
    pub result: bool,
}

/// Answers status queries from a shared ledger.
pub struct StatusService {
    ledger: Arc<ProgressLedger>,
}

impl StatusService {
    pub fn new(ledger: Arc<ProgressLedger>) -> Self {
        Self { ledger }
    }

    pub fn list_events(&self, request: &StatusRequest) -> StatusResponse {
        match request.identity() {
            Some(identity) => StatusResponse {
                events: Some(self.ledger.list_events(&identity)),
                result: true,
            },
            None => {
                error!(
                    user_id = ?request.user_id,
                    org_id = ?request.org_id,
                    "Validation failure: status query needs user_id and org_id"
                );
                StatusResponse {
                    events: None,
                    result: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_types::{OperationKind, OperationResult, ProgressEvent};
    use pretty_assertions::assert_eq;

    fn service_with_record() -> StatusService {
        let ledger = Arc::new(ProgressLedger::default());
        ledger.record(&ProgressEvent::processed(
            OperationKind::Ingested,
            &Identity::new("u1", "o1"),
            "/a/report.pdf",
            "report.pdf",
            &OperationResult::ok(),
        ));
        StatusService::new(ledger)
    }

    #[test]
    fn test_list_events_for_tenant() {
        let service = service_with_record();
        let response = service.list_events(&StatusRequest::new("u1", "o1"));
        assert!(response.result);
        let events = response.events.unwrap();
        let record = &events["report.pdf"];
        assert!(record.done);
        assert_eq!(record.result, Some(true));
        assert_eq!(record.percentage, 100.0);
    }

    #[test]
    fn test_unknown_tenant_is_empty_success() {
        let service = service_with_record();
        let response = service.list_events(&StatusRequest::new("u9", "o1"));
        assert!(response.result);
        assert_eq!(response.events, Some(TenantProgress::new()));
    }

    #[test]
    fn test_missing_identity_fails_validation() {
        let service = service_with_record();
        let missing_org = StatusRequest {
            user_id: Some("u1".to_string()),
            org_id: None,
        };
        let response = service.list_events(&missing_org);
        assert_eq!(
            response,
            StatusResponse {
                events: None,
                result: false
            }
        );

        let empty_user = StatusRequest::new("", "o1");
        assert!(!service.list_events(&empty_user).result);
    }

    #[test]
    fn test_response_serialization() {
        let service = service_with_record();
        let response = service.list_events(&StatusRequest::default());
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"result":false}"#);
    }
}
