//! Mapped policies: the association of a principal or group to a set of
//! policy names (§3, §4.3 `PolicyDBSet`).

use super::policy::PolicyNameSet;
use serde::{Deserialize, Serialize};

/// The four mapping buckets the path schema distinguishes (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingKind {
    User,
    StsUser,
    ServiceAccount,
    Group,
}

impl MappingKind {
    pub fn for_principal(principal: super::user::PrincipalKind, directory_mode: bool) -> Self {
        if directory_mode {
            return MappingKind::StsUser;
        }
        match principal {
            super::user::PrincipalKind::Regular => MappingKind::User,
            super::user::PrincipalKind::Sts => MappingKind::StsUser,
            super::user::PrincipalKind::ServiceAccount => MappingKind::ServiceAccount,
        }
    }
}

/// A single (principal-name, kind) -> policy-name-list mapping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedPolicy {
    pub policies: String,
    pub version: u64,
}

impl MappedPolicy {
    pub fn from_set(set: &PolicyNameSet) -> Self {
        Self {
            policies: set.to_joined_string(),
            version: 1,
        }
    }

    pub fn names(&self) -> PolicyNameSet {
        PolicyNameSet::parse(&self.policies)
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// Key identifying one mapping slot in the Identity Cache / Store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub name: String,
    pub kind: MappingKind,
}

impl MappingKey {
    pub fn new(name: impl Into<String>, kind: MappingKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mapped_policy_is_empty() {
        let mapped = MappedPolicy::from_set(&PolicyNameSet::default());
        assert!(mapped.is_empty());
    }

    #[test]
    fn mapping_kind_for_directory_mode_is_always_sts() {
        use super::super::user::PrincipalKind;
        assert_eq!(
            MappingKind::for_principal(PrincipalKind::Regular, true),
            MappingKind::StsUser
        );
        assert_eq!(
            MappingKind::for_principal(PrincipalKind::Regular, false),
            MappingKind::User
        );
    }
}
