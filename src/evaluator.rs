//! Authorization Evaluator (§4.4): turns a principal, an action, a resource
//! and whatever policy names apply into an allow/deny decision.
//!
//! Policy combination is "concatenate every applicable statement set into
//! one synthetic policy set and ask a real engine" rather than hand-rolled
//! statement matching — grounded on `AuthorizationEngine` in
//! `hodei-policies`' `internal::engine::core`, which does the same thing
//! with `cedar_policy::{PolicySet, Authorizer, Request, Entities}` in
//! schema-less mode.

use crate::cache::CacheInner;
use crate::domain::claims::SaPolicyKind;
use crate::domain::group::GroupStatus;
use crate::domain::mapping::MappingKind;
use crate::domain::user::PrincipalKind;
use crate::domain::{Claims, PolicyDocument, PolicyNameSet};
use crate::error::{IamError, IamResult};
use async_trait::async_trait;
use cedar_policy::{
    Authorizer, Context, Decision, Entities, Entity, EntityId, EntityTypeName, EntityUid, Policy,
    PolicyId, PolicySet, Request, RestrictedExpression,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Everything an authorization decision is a function of (§4.4 `AuthArgs`).
#[derive(Debug, Clone)]
pub struct AuthArgs {
    pub account: String,
    pub action: String,
    pub resource: String,
    pub groups: Vec<String>,
    pub claims: Claims,
    pub is_owner: bool,
}

impl AuthArgs {
    pub fn new(
        account: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            action: action.into(),
            resource: resource.into(),
            groups: Vec::new(),
            claims: Claims::new(),
            is_owner: false,
        }
    }

    fn with_account(&self, account: &str) -> Self {
        Self {
            account: account.to_string(),
            ..self.clone()
        }
    }
}

/// Hook for delegating the whole decision to an external system (§4.4 step
/// 1: "if an external policy evaluator is configured, delegate entirely to
/// it"). A transport failure is logged and treated as a denial rather than
/// propagated — a caller asking "am I allowed" has no use for a plumbing
/// error, only for yes or no.
#[async_trait]
pub trait ExternalPolicyEvaluator: Send + Sync {
    async fn is_allowed(&self, args: &AuthArgs) -> IamResult<bool>;
}

/// Resolves policy names to documents and runs them through Cedar (§4.4).
pub struct Evaluator {
    pub external: Option<Arc<dyn ExternalPolicyEvaluator>>,
}

impl Evaluator {
    pub fn new(external: Option<Arc<dyn ExternalPolicyEvaluator>>) -> Self {
        Self { external }
    }

    /// `IsAllowed` (§4.4): external delegation, then owner bypass, then
    /// STS/service-account/regular-user dispatch based on what the cache
    /// reports the account's principal kind to be.
    pub async fn is_allowed(
        &self,
        args: &AuthArgs,
        cache: &CacheInner,
        directory_mode: bool,
    ) -> IamResult<bool> {
        if let Some(external) = &self.external {
            return match external.is_allowed(args).await {
                Ok(decision) => Ok(decision),
                Err(err) => {
                    warn!(error = %err, "external policy evaluator failed, denying");
                    Ok(false)
                }
            };
        }

        if args.is_owner {
            return Ok(true);
        }

        match resolve_identity_kind(&args.account, cache) {
            Some((parent, MappingKind::StsUser)) => {
                self.is_allowed_sts(args, &parent, cache, directory_mode)
            }
            Some((parent, MappingKind::ServiceAccount)) => {
                self.is_allowed_service_account(args, &parent, cache, directory_mode)
            }
            _ => {
                let names = self.policy_db_get(&args.account, false, &args.groups, cache, directory_mode);
                self.combine_and_evaluate(&names, args, cache)
            }
        }
    }

    /// `IsAllowedSTS` (§4.4). In directory mode, defers to the LDAP variant;
    /// otherwise treats the claims as OpenID-style: the claimed policy
    /// names must match the STS user's own stored mapping exactly, and an
    /// attached `SessionPolicy` sub-policy narrows the combined policy via
    /// an AND rather than replacing it.
    fn is_allowed_sts(
        &self,
        args: &AuthArgs,
        parent: &str,
        cache: &CacheInner,
        directory_mode: bool,
    ) -> IamResult<bool> {
        if directory_mode {
            return self.is_allowed_ldap_sts(args, parent, cache);
        }

        let Some(claimed) = args.claims.openid_policy_claim() else {
            return Ok(false);
        };
        let claimed_names = PolicyNameSet::parse(claimed);
        let stored_names = self.policy_db_get(&args.account, false, &[], cache, directory_mode);
        if claimed_names != stored_names {
            return Ok(false);
        }

        let combined_decision = self.combine_and_evaluate(&stored_names, args, cache)?;

        match args.claims.session_policy() {
            Ok(Some(sub_policy)) => {
                let sub_decision = self.evaluate_single(&sub_policy.statement, args)?;
                Ok(combined_decision && sub_decision)
            }
            Ok(None) => Ok(combined_decision),
            Err(_) => Ok(false),
        }
    }

    /// `IsAllowedLDAPSTS`: the directory-user claim must name `parent`
    /// exactly, then policy resolution runs entirely off the parent's own
    /// (and its groups') mapped policies.
    fn is_allowed_ldap_sts(&self, args: &AuthArgs, parent: &str, cache: &CacheInner) -> IamResult<bool> {
        if args.claims.ldap_user() != Some(parent) {
            return Ok(false);
        }
        let names = self.policy_db_get(parent, false, &args.groups, cache, true);
        self.combine_and_evaluate(&names, args, cache)
    }

    /// `IsAllowedServiceAccount` (§4.4): the parent's combined policy is
    /// always consulted; an embedded session policy narrows it further via
    /// AND rather than substituting for it.
    fn is_allowed_service_account(
        &self,
        args: &AuthArgs,
        parent: &str,
        cache: &CacheInner,
        directory_mode: bool,
    ) -> IamResult<bool> {
        if args.claims.parent_claim() != Some(parent) {
            return Ok(false);
        }

        let names = self.policy_db_get(parent, false, &args.groups, cache, directory_mode);
        if names.is_empty() {
            return Ok(false);
        }
        let parent_args = args.with_account(parent);

        match args.claims.sa_policy() {
            Some(SaPolicyKind::Inherited) => self.combine_and_evaluate(&names, &parent_args, cache),
            Some(SaPolicyKind::Embedded) => {
                let session_policy = match args.claims.session_policy() {
                    Ok(Some(policy)) => policy,
                    Ok(None) | Err(_) => return Ok(false),
                };
                let combined_decision = self.combine_and_evaluate(&names, &parent_args, cache)?;
                let sub_decision = self.evaluate_single(&session_policy.statement, &parent_args)?;
                Ok(combined_decision && sub_decision)
            }
            None => Ok(false),
        }
    }

    /// `PolicyDBGet` (§4.4): the mapped policy-name set for one principal,
    /// expanded with every enabled group it belongs to. A missing mapping,
    /// a disabled/expired principal, or a disabled group all resolve to
    /// "no policies" rather than an error.
    fn policy_db_get(
        &self,
        name: &str,
        is_group: bool,
        groups: &[String],
        cache: &CacheInner,
        directory_mode: bool,
    ) -> PolicyNameSet {
        if is_group {
            return self.group_policy_names(name, cache, directory_mode);
        }

        let identity = resolve_identity_kind(name, cache);
        if !directory_mode {
            match &identity {
                None => return PolicyNameSet::parse(""),
                Some((_, kind)) => {
                    if let Some(id) = cache.users.get(&(name.to_string(), *kind)) {
                        if !id.is_valid() {
                            return PolicyNameSet::parse("");
                        }
                    }
                }
            }
        }
        let kind = identity
            .map(|(_, k)| k)
            .unwrap_or_else(|| MappingKind::for_principal(PrincipalKind::Regular, directory_mode));

        let mut names = PolicyNameSet::parse("");
        if let Some(mapped) = cache.mappings.get(&(name.to_string(), kind)) {
            names.extend(mapped.names());
        } else if let Some(parent) = cache
            .users
            .get(&(name.to_string(), kind))
            .and_then(|identity| identity.credentials.parent_user.clone())
        {
            if let Some(mapped) = cache.mappings.get(&(parent, kind)) {
                names.extend(mapped.names());
            }
        }

        for group in groups {
            names.extend(self.group_policy_names(group, cache, directory_mode));
        }
        names
    }

    fn group_policy_names(&self, name: &str, cache: &CacheInner, directory_mode: bool) -> PolicyNameSet {
        if !directory_mode {
            match cache.groups.get(name) {
                None => return PolicyNameSet::parse(""),
                Some(group) if group.status == GroupStatus::Disabled => return PolicyNameSet::parse(""),
                _ => {}
            }
        }
        cache
            .mappings
            .get(&(name.to_string(), MappingKind::Group))
            .map(|mapped| mapped.names())
            .unwrap_or_else(|| PolicyNameSet::parse(""))
    }

    /// Resolve names to documents (silently dropping dangling references,
    /// §9), concatenate their statements into one policy set and evaluate.
    fn combine_and_evaluate(
        &self,
        names: &PolicyNameSet,
        args: &AuthArgs,
        cache: &CacheInner,
    ) -> IamResult<bool> {
        if names.is_empty() {
            return Ok(false);
        }
        let docs: Vec<&PolicyDocument> = names
            .iter()
            .filter_map(|name| cache.policies.get(name))
            .collect();
        if docs.is_empty() {
            return Ok(false);
        }

        let mut set = PolicySet::new();
        for (idx, doc) in docs.iter().enumerate() {
            let policy = Policy::parse(Some(PolicyId::new(format!("p{idx}"))), &doc.statement)
                .map_err(|e| IamError::EvaluationError(format!("{}: {e}", doc.name)))?;
            set.add(policy)
                .map_err(|e| IamError::EvaluationError(e.to_string()))?;
        }
        self.evaluate(&set, args)
    }

    fn evaluate_single(&self, statement: &str, args: &AuthArgs) -> IamResult<bool> {
        let mut set = PolicySet::new();
        let policy = Policy::parse(Some(PolicyId::new("sub-policy")), statement)
            .map_err(|e| IamError::EvaluationError(e.to_string()))?;
        set.add(policy)
            .map_err(|e| IamError::EvaluationError(e.to_string()))?;
        self.evaluate(&set, args)
    }

    fn evaluate(&self, policies: &PolicySet, args: &AuthArgs) -> IamResult<bool> {
        let principal = build_entity("Iam::Principal", &args.account, "name", &args.account)?;
        let resource = build_entity("Iam::Resource", &args.resource, "path", &args.resource)?;
        let action_uid = EntityUid::from_str(&format!("Action::\"{}\"", args.action))
            .map_err(|e| IamError::EvaluationError(e.to_string()))?;

        let request = Request::new(
            principal.uid().clone(),
            action_uid,
            resource.uid().clone(),
            Context::empty(),
            None,
        )
        .map_err(|e| IamError::EvaluationError(e.to_string()))?;

        let entities = Entities::from_entities(vec![principal, resource], None)
            .map_err(|e| IamError::EvaluationError(e.to_string()))?;

        let response = Authorizer::new().is_authorized(&request, policies, &entities);
        Ok(matches!(response.decision(), Decision::Allow))
    }
}

/// Look up which bucket (`users` keyed by (name, kind)) holds `name`'s
/// identity, preferring STS, then service-account, then regular — the
/// dispatch order §4.4 names. Returns the identity's parent user (empty
/// string if none) alongside the kind found.
fn resolve_identity_kind(name: &str, cache: &CacheInner) -> Option<(String, MappingKind)> {
    for kind in [MappingKind::StsUser, MappingKind::ServiceAccount, MappingKind::User] {
        if let Some(identity) = cache.users.get(&(name.to_string(), kind)) {
            let parent = identity.credentials.parent_user.clone().unwrap_or_default();
            return Some((parent, kind));
        }
    }
    None
}

fn build_entity(type_name: &str, id: &str, attr: &str, value: &str) -> IamResult<Entity> {
    let type_name =
        EntityTypeName::from_str(type_name).map_err(|e| IamError::EvaluationError(e.to_string()))?;
    let uid = EntityUid::from_type_name_and_id(type_name, EntityId::new(id));
    let mut attrs = std::collections::HashMap::new();
    attrs.insert(attr.to_string(), RestrictedExpression::new_string(value.to_string()));
    Entity::new(uid, attrs, HashSet::new()).map_err(|e| IamError::EvaluationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::MappedPolicy;
    use crate::domain::user::{AccountStatus, Credentials, UserIdentity};

    fn doc(name: &str, statement: &str) -> PolicyDocument {
        PolicyDocument::new(name, statement)
    }

    #[tokio::test]
    async fn owner_bypasses_every_check() {
        let evaluator = Evaluator::new(None);
        let cache = CacheInner::default();
        let mut args = AuthArgs::new("alice", "s3:GetObject", "bkt/obj");
        args.is_owner = true;
        assert!(evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }

    #[tokio::test]
    async fn regular_user_allowed_via_direct_policy() {
        let evaluator = Evaluator::new(None);
        let mut cache = CacheInner::default();
        cache.policies.insert(
            "readonly".to_string(),
            doc("readonly", "permit(principal, action, resource);"),
        );
        cache.users.insert(
            ("alice".to_string(), MappingKind::User),
            UserIdentity::new(Credentials::new("alice", "secret"), PrincipalKind::Regular),
        );
        cache.mappings.insert(
            ("alice".to_string(), MappingKind::User),
            MappedPolicy::from_set(&PolicyNameSet::parse("readonly")),
        );

        let args = AuthArgs::new("alice", "s3:GetObject", "bkt/obj");
        assert!(evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }

    #[tokio::test]
    async fn unmapped_principal_is_denied() {
        let evaluator = Evaluator::new(None);
        let cache = CacheInner::default();
        let args = AuthArgs::new("nobody", "s3:GetObject", "bkt/obj");
        assert!(!evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_regular_user_is_denied() {
        let evaluator = Evaluator::new(None);
        let mut cache = CacheInner::default();
        cache.policies.insert(
            "readonly".to_string(),
            doc("readonly", "permit(principal, action, resource);"),
        );
        cache.users.insert(
            ("alice".to_string(), MappingKind::User),
            UserIdentity::new(
                {
                    let mut c = Credentials::new("alice", "secret");
                    c.status = AccountStatus::Disabled;
                    c
                },
                PrincipalKind::Regular,
            ),
        );
        cache.mappings.insert(
            ("alice".to_string(), MappingKind::User),
            MappedPolicy::from_set(&PolicyNameSet::parse("readonly")),
        );

        let args = AuthArgs::new("alice", "s3:GetObject", "bkt/obj");
        assert!(!evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }

    #[tokio::test]
    async fn group_policy_is_combined_with_direct_policy() {
        let evaluator = Evaluator::new(None);
        let mut cache = CacheInner::default();
        cache.policies.insert(
            "writeonly".to_string(),
            doc(
                "writeonly",
                "permit(principal, action == Action::\"s3:PutObject\", resource);",
            ),
        );
        cache.mappings.insert(
            ("devs".to_string(), MappingKind::Group),
            MappedPolicy::from_set(&PolicyNameSet::parse("writeonly")),
        );
        cache.groups.insert(
            "devs".to_string(),
            crate::domain::GroupInfo::new("devs"),
        );

        let mut args = AuthArgs::new("bob", "s3:PutObject", "bkt/obj");
        args.groups.push("devs".to_string());
        assert!(evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_group_contributes_no_policy() {
        let evaluator = Evaluator::new(None);
        let mut cache = CacheInner::default();
        cache.policies.insert(
            "writeonly".to_string(),
            doc(
                "writeonly",
                "permit(principal, action == Action::\"s3:PutObject\", resource);",
            ),
        );
        cache.mappings.insert(
            ("devs".to_string(), MappingKind::Group),
            MappedPolicy::from_set(&PolicyNameSet::parse("writeonly")),
        );
        let mut group = crate::domain::GroupInfo::new("devs");
        group.status = GroupStatus::Disabled;
        cache.groups.insert("devs".to_string(), group);

        let mut args = AuthArgs::new("bob", "s3:PutObject", "bkt/obj");
        args.groups.push("devs".to_string());
        assert!(!evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }

    #[tokio::test]
    async fn service_account_embedded_policy_requires_parent_to_also_allow() {
        let evaluator = Evaluator::new(None);
        let mut cache = CacheInner::default();
        cache.policies.insert(
            "readonly".to_string(),
            doc(
                "readonly",
                "permit(principal, action == Action::\"s3:GetObject\", resource);",
            ),
        );
        cache.mappings.insert(
            ("alice".to_string(), MappingKind::User),
            MappedPolicy::from_set(&PolicyNameSet::parse("readonly")),
        );
        cache.users.insert(
            ("sa1".to_string(), MappingKind::ServiceAccount),
            UserIdentity::new(
                {
                    let mut c = Credentials::new("sa1", "secret");
                    c.parent_user = Some("alice".to_string());
                    c
                },
                PrincipalKind::ServiceAccount,
            ),
        );

        let session_policy = crate::domain::claims::SessionPolicy {
            version: "2012-10-17".to_string(),
            statement: "permit(principal, action, resource);".to_string(),
        };
        let encoded = Claims::encode_session_policy(&session_policy).unwrap();
        let claims = Claims::new()
            .with("parentClaim", serde_json::Value::String("alice".to_string()))
            .with("sa-policy", serde_json::Value::String("embedded-policy".to_string()))
            .with("SessionPolicy", serde_json::Value::String(encoded));

        let mut allowed_args = AuthArgs::new("sa1", "s3:GetObject", "bkt/x");
        allowed_args.claims = claims.clone();
        assert!(evaluator.is_allowed(&allowed_args, &cache, false).await.unwrap());

        // The session policy alone would allow PutObject, but alice's
        // combined policy only covers GetObject — the AND must deny it.
        let mut denied_args = AuthArgs::new("sa1", "s3:PutObject", "bkt/x");
        denied_args.claims = claims;
        assert!(!evaluator.is_allowed(&denied_args, &cache, false).await.unwrap());
    }

    struct AlwaysDeny;

    #[async_trait]
    impl ExternalPolicyEvaluator for AlwaysDeny {
        async fn is_allowed(&self, _args: &AuthArgs) -> IamResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn external_evaluator_takes_precedence_over_owner() {
        let evaluator = Evaluator::new(Some(Arc::new(AlwaysDeny)));
        let cache = CacheInner::default();
        let mut args = AuthArgs::new("alice", "s3:GetObject", "bkt/obj");
        args.is_owner = true;
        // Step 1 (external delegation) runs before step 2 (owner bypass).
        assert!(!evaluator.is_allowed(&args, &cache, false).await.unwrap());
    }
}
