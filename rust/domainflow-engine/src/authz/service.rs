//! Authorization service

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::authz::risk::risk_score;
use crate::authz::types::*;
use crate::campaign::CampaignId;
use crate::concurrency::CancelToken;
use crate::error::EngineResult;
use crate::storage::TransactionRunner;

/// Resolves permissions, ownership, and campaign access into a decision
///
/// Every check leaves an authorization-decision record; a deny additionally
/// leaves an access-violation record with its risk score. Audit failures are
/// logged to the last-resort sink and never silently swallowed.
pub struct AuthorizationService {
    runner: Arc<TransactionRunner>,
}

impl AuthorizationService {
    /// Create the service
    pub fn new(runner: Arc<TransactionRunner>) -> Self {
        Self { runner }
    }

    fn is_owner(&self, request: &AuthzRequest) -> EngineResult<bool> {
        let (Some(resource_type), Some(resource_id)) = (&request.resource_type, &request.resource_id) else {
            return Ok(false);
        };
        match resource_type.as_str() {
            "campaign" => {
                let id = match CampaignId::parse_str(resource_id) {
                    Ok(id) => id,
                    Err(_) => return Ok(false),
                };
                Ok(self
                    .runner
                    .store()
                    .load_campaign(id)?
                    .map(|c| c.owner_id == request.user_id)
                    .unwrap_or(false))
            }
            "persona" | "proxy" => Ok(self
                .runner
                .store()
                .load_resource_owner(resource_type, resource_id)?
                .map(|owner| owner == request.user_id)
                .unwrap_or(false)),
            _ => Ok(false),
        }
    }

    fn has_campaign_access(&self, request: &AuthzRequest) -> EngineResult<bool> {
        let Some(campaign_id) = request.campaign_id else {
            return Ok(false);
        };
        let store = self.runner.store();
        let owns = store
            .load_campaign(campaign_id)?
            .map(|c| c.owner_id == request.user_id)
            .unwrap_or(false);
        if owns {
            return Ok(true);
        }
        store.has_active_grant(campaign_id, &request.user_id)
    }

    fn evaluate(
        rule: &EndpointRule,
        permissions: &[PermissionGrant],
        is_owner: bool,
        has_access: bool,
        campaign_in_scope: bool,
    ) -> (Decision, String) {
        let now = Utc::now();
        let held: Vec<&str> = permissions
            .iter()
            .filter(|g| g.is_active(now))
            .map(|g| g.permission.as_str())
            .collect();

        if rule.admin_only && !held.contains(&"system:admin") {
            return (Decision::Deny, "admin-only endpoint".to_string());
        }
        for required in &rule.required_permissions {
            if !held.contains(&required.as_str()) {
                return (Decision::Deny, format!("missing permission {}", required));
            }
        }
        if rule.require_ownership && !is_owner {
            return (Decision::Deny, "caller does not own the resource".to_string());
        }
        if rule.require_campaign_access && campaign_in_scope && !has_access {
            return (Decision::Deny, "no campaign access".to_string());
        }
        (Decision::Allow, "rule satisfied".to_string())
    }

    /// Run one authorization check
    pub async fn authorize(&self, token: &CancelToken, request: &AuthzRequest) -> EngineResult<AuthzOutcome> {
        let store = self.runner.store();
        let permissions = store.load_permission_grants(&request.user_id)?;
        let is_owner = self.is_owner(request)?;
        let has_access = self.has_campaign_access(request)?;
        let rule = store.load_endpoint_rule(&request.method, &request.endpoint)?;

        let (decision, reason) = match &rule {
            Some(rule) => Self::evaluate(
                rule,
                &permissions,
                is_owner,
                has_access,
                request.campaign_id.is_some(),
            ),
            None => (Decision::Deny, "no authorization rule for endpoint".to_string()),
        };

        let score = match decision {
            Decision::Deny => Some(risk_score(request, rule.as_ref())),
            Decision::Allow => None,
        };

        self.audit(token, request, decision, &reason, score).await;

        match decision {
            Decision::Allow => {
                info!(user_id = %request.user_id, endpoint = %request.endpoint, "authorization allowed");
            }
            Decision::Deny => {
                warn!(
                    user_id = %request.user_id,
                    endpoint = %request.endpoint,
                    reason = %reason,
                    risk_score = score.unwrap_or(0),
                    "authorization denied"
                );
                metrics::counter!("authorization_denials_total").increment(1);
            }
        }

        Ok(AuthzOutcome { decision, reason, risk_score: score })
    }

    async fn audit(
        &self,
        token: &CancelToken,
        request: &AuthzRequest,
        decision: Decision,
        reason: &str,
        score: Option<u8>,
    ) {
        let record = AuthorizationDecision {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            request_id: request.request_id.clone(),
            method: request.method.clone(),
            endpoint: request.endpoint.clone(),
            resource_type: request.resource_type.clone(),
            resource_id: request.resource_id.clone(),
            campaign_id: request.campaign_id,
            decision,
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        let violation = score.map(|risk| AccessViolation {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            request_id: request.request_id.clone(),
            method: request.method.clone(),
            endpoint: request.endpoint.clone(),
            risk_score: risk,
            reason: reason.to_string(),
            created_at: Utc::now(),
        });

        let result = self
            .runner
            .run(token, crate::storage::TxOptions::system("audit_authorization"), move |tx| {
                tx.store().append_auth_decision(&record)?;
                if let Some(violation) = &violation {
                    tx.store().append_access_violation(violation)?;
                }
                Ok(())
            })
            .await;

        if let Err(err) = result {
            // Last-resort sink: the audit failure itself must be visible
            error!(
                error = %err,
                user_id = %request.user_id,
                request_id = %request.request_id,
                endpoint = %request.endpoint,
                ?decision,
                "FAILED TO WRITE AUTHORIZATION AUDIT RECORD"
            );
            metrics::counter!("authorization_audit_failures_total").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StateStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn service() -> (TempDir, Arc<TransactionRunner>, AuthorizationService) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()).unwrap());
        let runner = Arc::new(TransactionRunner::new(store));
        let service = AuthorizationService::new(Arc::clone(&runner));
        (dir, runner, service)
    }

    fn delete_rule() -> EndpointRule {
        EndpointRule {
            pattern: "/campaigns/{id}".into(),
            method: "DELETE".into(),
            required_permissions: vec!["campaigns:delete".into()],
            require_ownership: true,
            require_campaign_access: false,
            admin_only: false,
            destructive: true,
        }
    }

    fn delete_request(user: &str, campaign: CampaignId) -> AuthzRequest {
        AuthzRequest {
            user_id: user.into(),
            session_id: "sess-1".into(),
            request_id: "req-1".into(),
            method: "DELETE".into(),
            endpoint: "/campaigns/{id}".into(),
            resource_type: Some("campaign".into()),
            resource_id: Some(campaign.to_string()),
            campaign_id: Some(campaign),
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn deny_without_permission_audits_and_scores() {
        let (_dir, runner, service) = service();
        let token = CancelToken::new();
        runner.store().save_endpoint_rule(&delete_rule()).unwrap();
        let campaign =
            crate::campaign::Campaign::new("owner-1", crate::campaign::CampaignType::Generation, crate::campaign::ExecutionMode::SinglePhase);
        runner.store().save_campaign(&campaign).unwrap();

        let outcome = service.authorize(&token, &delete_request("intruder", campaign.id)).await.unwrap();
        assert_eq!(outcome.decision, Decision::Deny);
        assert!(outcome.risk_score.unwrap() >= 80);

        let decisions = runner.store().list_auth_decisions().unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision, Decision::Deny);
        let violations = runner.store().list_access_violations().unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].risk_score >= 80);
    }

    #[tokio::test]
    async fn owner_with_permission_is_allowed() {
        let (_dir, runner, service) = service();
        let token = CancelToken::new();
        runner.store().save_endpoint_rule(&delete_rule()).unwrap();
        let campaign =
            crate::campaign::Campaign::new("owner-1", crate::campaign::CampaignType::Generation, crate::campaign::ExecutionMode::SinglePhase);
        runner.store().save_campaign(&campaign).unwrap();
        runner
            .store()
            .save_permission_grants(
                "owner-1",
                &[PermissionGrant { permission: "campaigns:delete".into(), role: "editor".into(), expires_at: None }],
            )
            .unwrap();

        let outcome = service.authorize(&token, &delete_request("owner-1", campaign.id)).await.unwrap();
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(outcome.risk_score.is_none());
        assert!(runner.store().list_access_violations().unwrap().is_empty());
        assert_eq!(runner.store().list_auth_decisions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_permissions_do_not_count() {
        let (_dir, runner, service) = service();
        let token = CancelToken::new();
        runner.store().save_endpoint_rule(&delete_rule()).unwrap();
        let campaign =
            crate::campaign::Campaign::new("owner-1", crate::campaign::CampaignType::Generation, crate::campaign::ExecutionMode::SinglePhase);
        runner.store().save_campaign(&campaign).unwrap();
        runner
            .store()
            .save_permission_grants(
                "owner-1",
                &[PermissionGrant {
                    permission: "campaigns:delete".into(),
                    role: "editor".into(),
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
                }],
            )
            .unwrap();

        let outcome = service.authorize(&token, &delete_request("owner-1", campaign.id)).await.unwrap();
        assert_eq!(outcome.decision, Decision::Deny);
    }

    #[tokio::test]
    async fn grant_gives_campaign_access() {
        let (_dir, runner, service) = service();
        let token = CancelToken::new();
        let mut rule = delete_rule();
        rule.method = "GET".into();
        rule.pattern = "/campaigns/{id}/events".into();
        rule.required_permissions = vec![];
        rule.require_ownership = false;
        rule.require_campaign_access = true;
        rule.destructive = false;
        runner.store().save_endpoint_rule(&rule).unwrap();

        let campaign =
            crate::campaign::Campaign::new("owner-1", crate::campaign::CampaignType::Generation, crate::campaign::ExecutionMode::SinglePhase);
        runner.store().save_campaign(&campaign).unwrap();

        let mut request = delete_request("viewer-1", campaign.id);
        request.method = "GET".into();
        request.endpoint = "/campaigns/{id}/events".into();

        let denied = service.authorize(&token, &request).await.unwrap();
        assert_eq!(denied.decision, Decision::Deny);

        runner
            .store()
            .save_campaign_grant(&CampaignAccessGrant {
                campaign_id: campaign.id,
                user_id: "viewer-1".into(),
                active: true,
                granted_at: Utc::now(),
                expires_at: None,
            })
            .unwrap();
        let allowed = service.authorize(&token, &request).await.unwrap();
        assert_eq!(allowed.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn missing_rule_denies() {
        let (_dir, _runner, service) = service();
        let token = CancelToken::new();
        let outcome = service.authorize(&token, &delete_request("anyone", CampaignId::new())).await.unwrap();
        assert_eq!(outcome.decision, Decision::Deny);
    }
}
