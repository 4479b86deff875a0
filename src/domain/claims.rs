//! Session token claims recognized by the evaluator (§6, §4.4).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const PARENT_CLAIM: &str = "parentClaim";
pub const SA_POLICY_CLAIM: &str = "sa-policy";
pub const SESSION_POLICY_CLAIM: &str = "SessionPolicy";
pub const LDAP_USER_CLAIM: &str = "ldap-user";
pub const OPENID_POLICY_CLAIM: &str = "openid-policy-claim";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaPolicyKind {
    Embedded,
    Inherited,
}

/// An inline, session-scoped policy document carried in a claim (§4.3
/// NewServiceAccount, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub version: String,
    pub statement: String,
}

/// Maximum encoded size of an embedded session policy (§4.3 NewServiceAccount).
pub const MAX_SESSION_POLICY_SIZE: usize = 16 * 1024;

/// Thin wrapper over the claim map carried by a request (§4.4).
#[derive(Debug, Clone, Default)]
pub struct Claims(pub HashMap<String, Value>);

impl Claims {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn parent_claim(&self) -> Option<&str> {
        self.get_str(PARENT_CLAIM)
    }

    pub fn sa_policy(&self) -> Option<SaPolicyKind> {
        match self.get_str(SA_POLICY_CLAIM) {
            Some("embedded-policy") => Some(SaPolicyKind::Embedded),
            Some("inherited-policy") => Some(SaPolicyKind::Inherited),
            _ => None,
        }
    }

    pub fn ldap_user(&self) -> Option<&str> {
        self.get_str(LDAP_USER_CLAIM)
    }

    pub fn openid_policy_claim(&self) -> Option<&str> {
        self.get_str(OPENID_POLICY_CLAIM)
    }

    /// Decode the `SessionPolicy` claim: base64 of a JSON-encoded
    /// `SessionPolicy`, which must have a non-empty `version` (§4.4).
    pub fn session_policy(&self) -> Result<Option<SessionPolicy>, crate::error::IamError> {
        use base64::Engine;

        let Some(raw) = self.get_str(SESSION_POLICY_CLAIM) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| crate::error::IamError::ClaimError(format!("invalid base64: {e}")))?;
        let policy: SessionPolicy = serde_json::from_slice(&decoded)
            .map_err(|e| crate::error::IamError::ClaimError(format!("invalid session policy json: {e}")))?;
        if policy.version.is_empty() {
            return Err(crate::error::IamError::ClaimError(
                "session policy version is empty".to_string(),
            ));
        }
        Ok(Some(policy))
    }

    pub fn encode_session_policy(policy: &SessionPolicy) -> Result<String, crate::error::IamError> {
        use base64::Engine;

        let bytes = serde_json::to_vec(policy)?;
        if bytes.len() > MAX_SESSION_POLICY_SIZE {
            return Err(crate::error::IamError::SessionPolicyTooLarge(bytes.len()));
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_claim_roundtrip() {
        let claims = Claims::new().with(PARENT_CLAIM, Value::String("alice".to_string()));
        assert_eq!(claims.parent_claim(), Some("alice"));
    }

    #[test]
    fn sa_policy_parses_known_values_only() {
        let claims = Claims::new().with(SA_POLICY_CLAIM, Value::String("embedded-policy".to_string()));
        assert_eq!(claims.sa_policy(), Some(SaPolicyKind::Embedded));

        let claims = Claims::new().with(SA_POLICY_CLAIM, Value::String("nonsense".to_string()));
        assert_eq!(claims.sa_policy(), None);
    }

    #[test]
    fn session_policy_round_trips_through_base64() {
        let policy = SessionPolicy {
            version: "2012-10-17".to_string(),
            statement: "permit(principal, action == Action::\"s3:GetObject\", resource);".to_string(),
        };
        let encoded = Claims::encode_session_policy(&policy).unwrap();
        let claims = Claims::new().with(SESSION_POLICY_CLAIM, Value::String(encoded));
        let decoded = claims.session_policy().unwrap().unwrap();
        assert_eq!(decoded.version, policy.version);
        assert_eq!(decoded.statement, policy.statement);
    }

    #[test]
    fn session_policy_with_empty_version_is_rejected() {
        let policy = SessionPolicy {
            version: String::new(),
            statement: "permit(principal, action, resource);".to_string(),
        };
        let encoded = Claims::encode_session_policy(&policy).unwrap();
        let claims = Claims::new().with(SESSION_POLICY_CLAIM, Value::String(encoded));
        assert!(claims.session_policy().is_err());
    }

    #[test]
    fn oversized_session_policy_is_rejected_at_encode_time() {
        let policy = SessionPolicy {
            version: "1".to_string(),
            statement: "a".repeat(MAX_SESSION_POLICY_SIZE),
        };
        assert!(Claims::encode_session_policy(&policy).is_err());
    }
}
