//! Risk scoring for denied requests

use crate::authz::{AuthzRequest, EndpointRule};

/// Score a denied request on the [0, 100] scale
///
/// Denials start at 40; destructive endpoints, DELETE methods, and
/// admin-scoped endpoints escalate. Deny + admin + destructive lands at 100.
pub fn risk_score(request: &AuthzRequest, rule: Option<&EndpointRule>) -> u8 {
    let mut score: u32 = 40;
    if let Some(rule) = rule {
        if rule.destructive {
            score += 30;
        }
        if rule.admin_only {
            score += 15;
        }
    }
    if request.method.eq_ignore_ascii_case("DELETE") {
        score += 15;
    }
    score.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(method: &str) -> AuthzRequest {
        AuthzRequest {
            user_id: "u-1".into(),
            session_id: "s-1".into(),
            request_id: "r-1".into(),
            method: method.into(),
            endpoint: "/campaigns/{id}".into(),
            resource_type: Some("campaign".into()),
            resource_id: Some("c-1".into()),
            campaign_id: None,
            context: HashMap::new(),
        }
    }

    fn rule(destructive: bool, admin_only: bool) -> EndpointRule {
        EndpointRule {
            pattern: "/campaigns/{id}".into(),
            method: "DELETE".into(),
            required_permissions: vec!["campaigns:delete".into()],
            require_ownership: false,
            require_campaign_access: false,
            admin_only,
            destructive,
        }
    }

    #[test]
    fn destructive_delete_scores_at_least_80() {
        let score = risk_score(&request("DELETE"), Some(&rule(true, false)));
        assert!(score >= 80, "score was {}", score);
    }

    #[test]
    fn admin_destructive_deny_saturates() {
        assert_eq!(risk_score(&request("DELETE"), Some(&rule(true, true))), 100);
    }

    #[test]
    fn plain_read_deny_scores_low() {
        let score = risk_score(&request("GET"), Some(&rule(false, false)));
        assert_eq!(score, 40);
    }

    #[test]
    fn score_is_bounded() {
        let score = risk_score(&request("DELETE"), Some(&rule(true, true)));
        assert!(score <= 100);
    }
}
