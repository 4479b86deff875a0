//! Session-token signing/verification is explicitly out of scope for the
//! core's own logic (§1: "consumed as a library") — but the core still
//! needs somewhere to turn a `Claims` map into the opaque `session_token`
//! string it stores on a credential. `ClaimsSigner` is that seam; the
//! default implementation signs with `jsonwebtoken` the same way the
//! reference codebase's login use case does.

use crate::domain::Claims;
use crate::error::{IamError, IamResult};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::collections::BTreeMap;

pub trait ClaimsSigner: Send + Sync {
    fn sign(&self, claims: &Claims) -> IamResult<String>;
}

/// HMAC-signed claims, grounded on the `jsonwebtoken::encode` pattern used
/// by the login feature's use case.
pub struct HmacClaimsSigner {
    key: EncodingKey,
}

impl HmacClaimsSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
        }
    }
}

impl ClaimsSigner for HmacClaimsSigner {
    fn sign(&self, claims: &Claims) -> IamResult<String> {
        let ordered: BTreeMap<String, serde_json::Value> = claims.0.clone().into_iter().collect();
        encode(&Header::default(), &ordered, &self.key).map_err(|e| IamError::ClaimError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn signs_claims_without_error() {
        let signer = HmacClaimsSigner::new(b"test-secret");
        let claims = Claims::new().with("parentClaim", Value::String("alice".to_string()));
        let token = signer.sign(&claims).unwrap();
        assert!(!token.is_empty());
    }
}
