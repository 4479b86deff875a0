//! End-to-end scenarios exercising the orchestrator and evaluator together
//! against the in-memory store, matching the literal walkthroughs used to
//! validate this core during design.

use iam_core::domain::claims::{
    Claims, SessionPolicy, OPENID_POLICY_CLAIM, PARENT_CLAIM, SA_POLICY_CLAIM, SESSION_POLICY_CLAIM,
};
use iam_core::domain::{Credentials, PolicyDocument};
use iam_core::store::in_memory::InMemoryStore;
use iam_core::{AuthArgs, Config, IamSys, NewServiceAccountOpts};
use serde_json::Value;
use std::sync::Arc;

fn new_sys() -> IamSys {
    IamSys::new(Arc::new(InMemoryStore::new()), false, Config::default(), b"test-signing-secret")
}

#[tokio::test]
async fn s1_direct_policy_grants_only_the_named_action() {
    let sys = new_sys();
    sys.load_all().await.unwrap(); // installs the canned `readonly` policy

    sys.create_user("alice", Credentials::new("alice", "secret"), None)
        .await
        .unwrap();
    sys.policy_db_set("alice", "readonly", false).await.unwrap();

    let get = AuthArgs::new("alice", "s3:GetObject", "bkt/obj");
    assert!(sys.is_allowed(&get).await.unwrap());

    let put = AuthArgs::new("alice", "s3:PutObject", "bkt/obj");
    assert!(!sys.is_allowed(&put).await.unwrap());
}

#[tokio::test]
async fn s2_deleting_a_policy_empties_every_mapping_that_referenced_it() {
    let sys = new_sys();
    sys.load_all().await.unwrap();
    sys.create_user("alice", Credentials::new("alice", "secret"), None)
        .await
        .unwrap();
    sys.policy_db_set("alice", "readonly", false).await.unwrap();

    let get = AuthArgs::new("alice", "s3:GetObject", "bkt/obj");
    assert!(sys.is_allowed(&get).await.unwrap());

    sys.delete_policy("readonly").await.unwrap();
    assert!(!sys.is_allowed(&get).await.unwrap());

    // `policyDBSet` with an empty name list deletes the mapping record
    // rather than storing an empty one (§4.3 `PolicyDBSet`); either way
    // alice now resolves to no policies at all.
    let mapped = sys.store().get_mapped_policy("alice", iam_core::domain::MappingKind::User).await;
    assert!(mapped.is_err());
}

#[tokio::test]
async fn s3_group_policy_applies_until_the_group_is_disabled() {
    let sys = new_sys();
    sys.load_all().await.unwrap();
    sys.create_user("bob", Credentials::new("bob", "secret"), None)
        .await
        .unwrap();
    sys.add_users_to_group("g1", &["bob".to_string()]).await.unwrap();
    sys.policy_db_set("g1", "readwrite", true).await.unwrap();

    let mut put = AuthArgs::new("bob", "s3:PutObject", "bkt/obj");
    put.groups.push("g1".to_string());
    assert!(sys.is_allowed(&put).await.unwrap());

    sys.set_group_status("g1", false).await.unwrap();
    assert!(!sys.is_allowed(&put).await.unwrap());
}

#[tokio::test]
async fn s4_embedded_session_policy_requires_the_parent_to_also_allow() {
    let sys = new_sys();
    sys.load_all().await.unwrap();
    sys.create_user("alice", Credentials::new("alice", "secret"), None)
        .await
        .unwrap();
    sys.policy_db_set("alice", "readonly", false).await.unwrap();

    let session_policy = SessionPolicy {
        version: "2012-10-17".to_string(),
        statement: "permit(principal, action == Action::\"s3:GetObject\", resource) when { resource.path like \"bkt/*\" };".to_string(),
    };
    let sa = sys
        .new_service_account(
            "alice",
            vec![],
            NewServiceAccountOpts {
                access_key: None,
                secret_key: None,
                session_policy: Some(session_policy.clone()),
            },
        )
        .await
        .unwrap();

    let encoded = Claims::encode_session_policy(&session_policy).unwrap();
    let claims = Claims::new()
        .with(PARENT_CLAIM, Value::String("alice".to_string()))
        .with(SA_POLICY_CLAIM, Value::String("embedded-policy".to_string()))
        .with(SESSION_POLICY_CLAIM, Value::String(encoded));

    let mut allowed = AuthArgs::new(sa.credentials.access_key.clone(), "s3:GetObject", "bkt/x");
    allowed.claims = claims.clone();
    assert!(sys.is_allowed(&allowed).await.unwrap());

    let mut denied = AuthArgs::new(sa.credentials.access_key.clone(), "s3:PutObject", "bkt/x");
    denied.claims = claims;
    assert!(!sys.is_allowed(&denied).await.unwrap());
}

#[tokio::test]
async fn s5_expired_temp_user_is_swept_on_the_next_full_load() {
    let sys = new_sys();
    sys.load_all().await.unwrap();

    let mut cred = Credentials::new("tmp1", "secret");
    cred.expiration = Some(chrono::Utc::now() + chrono::Duration::milliseconds(20));
    sys.set_temp_user("tmp1", cred, Some("readonly")).await.unwrap();

    let mut get = AuthArgs::new("tmp1", "s3:GetObject", "bkt/obj");
    get.claims = Claims::new().with(OPENID_POLICY_CLAIM, Value::String("readonly".to_string()));
    assert!(sys.is_allowed(&get).await.unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    sys.load_all().await.unwrap();

    assert!(sys.get_user("tmp1").await.is_err());
    assert!(!sys.is_allowed(&get).await.unwrap());
}

#[tokio::test]
async fn s6_removing_all_members_requires_an_explicit_empty_call() {
    let sys = new_sys();
    sys.load_all().await.unwrap();
    sys.create_user("bob", Credentials::new("bob", "secret"), None)
        .await
        .unwrap();
    sys.add_users_to_group("g1", &["bob".to_string()]).await.unwrap();

    let err = sys.remove_users_from_group("g1", &[]).await.unwrap_err();
    assert!(matches!(err, iam_core::IamError::GroupNotEmpty(_)));

    sys.remove_users_from_group("g1", &["bob".to_string()]).await.unwrap();
    sys.remove_users_from_group("g1", &[]).await.unwrap();

    assert!(sys.store().get_group_info("g1").await.is_err());
    let mapped = sys.store().get_mapped_policy("g1", iam_core::domain::MappingKind::Group).await;
    assert!(mapped.is_err());
}

#[tokio::test]
async fn policy_validation_round_trip_with_a_custom_document() {
    let sys = new_sys();
    sys.load_all().await.unwrap();
    sys.set_policy(
        "custom",
        PolicyDocument::new("custom", "permit(principal, action == Action::\"s3:ListBucket\", resource);"),
    )
    .await
    .unwrap();

    sys.create_user("carol", Credentials::new("carol", "secret"), Some("custom"))
        .await
        .unwrap();

    let list = AuthArgs::new("carol", "s3:ListBucket", "bkt");
    assert!(sys.is_allowed(&list).await.unwrap());
}
