//! User identities: regular users, temporary STS users, and service
//! accounts all share one `Credentials` shape distinguished by `PrincipalKind`
//! (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the three principal kinds a `UserIdentity` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalKind {
    Regular,
    Sts,
    ServiceAccount,
}

/// Account on/off switch (§3). STS and service-account kinds never use
/// `SetUserStatus` directly (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Enabled,
    Disabled,
}

impl AccountStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "enabled" | "on" => Some(AccountStatus::Enabled),
            "disabled" | "off" => Some(AccountStatus::Disabled),
            _ => None,
        }
    }
}

/// The shared credential shape for every principal kind (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub status: AccountStatus,
    pub parent_user: Option<String>,
    pub groups: Option<Vec<String>>,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            status: AccountStatus::Enabled,
            parent_user: None,
            groups: None,
            session_token: None,
            expiration: None,
        }
    }

    /// True once `expiration` is set and in the past (§3 I4, §8 P5).
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(exp) => exp <= Utc::now(),
            None => false,
        }
    }
}

/// A complete identity record as held in the cache and the store (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub credentials: Credentials,
    pub kind: PrincipalKind,
}

impl UserIdentity {
    pub fn new(credentials: Credentials, kind: PrincipalKind) -> Self {
        Self { credentials, kind }
    }

    /// `IsValid` from §4.4 `PolicyDBGet`: enabled and not expired.
    pub fn is_valid(&self) -> bool {
        self.credentials.status == AccountStatus::Enabled && !self.credentials.is_expired()
    }

    pub fn is_temp(&self) -> bool {
        self.kind == PrincipalKind::Sts
    }

    pub fn is_service_account(&self) -> bool {
        self.kind == PrincipalKind::ServiceAccount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expired_credential_is_invalid() {
        let mut creds = Credentials::new("ak", "sk");
        creds.expiration = Some(Utc::now() - Duration::seconds(1));
        let identity = UserIdentity::new(creds, PrincipalKind::Sts);
        assert!(identity.credentials.is_expired());
        assert!(!identity.is_valid());
    }

    #[test]
    fn disabled_user_is_invalid() {
        let mut creds = Credentials::new("ak", "sk");
        creds.status = AccountStatus::Disabled;
        let identity = UserIdentity::new(creds, PrincipalKind::Regular);
        assert!(!identity.is_valid());
    }

    #[test]
    fn status_parsing_accepts_both_spellings() {
        assert_eq!(AccountStatus::parse("enabled"), Some(AccountStatus::Enabled));
        assert_eq!(AccountStatus::parse("on"), Some(AccountStatus::Enabled));
        assert_eq!(AccountStatus::parse("off"), Some(AccountStatus::Disabled));
        assert_eq!(AccountStatus::parse("bogus"), None);
    }
}
