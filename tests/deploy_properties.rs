//! Integration tests for deploy: idempotence, drift and version pruning

use ram_reconciler::client::Call;
use ram_reconciler::{
    Effect, IdentityClient, MemoryIdentityService, Method, PolicyDocument, PolicyReference,
    Reconciler, RetryPolicy, RoleConfig, Statement, VERSION_CEILING,
};

/// Helper to create a service with one provider-managed policy
fn create_service() -> MemoryIdentityService {
    let service = MemoryIdentityService::new("1234567890");
    let document = PolicyDocument::new(vec![Statement::new(Effect::Allow, "oss:Get*", "*")]);
    service
        .add_system_policy("AliyunOSSReadOnlyAccess", &document)
        .unwrap();
    service
}

fn reconciler(service: &MemoryIdentityService) -> Reconciler<MemoryIdentityService> {
    Reconciler::new(service.clone(), RetryPolicy::immediate(2))
}

fn log_statement(action: &str) -> Vec<Statement> {
    vec![Statement::new(Effect::Allow, action, "acs:log:*:*:project/fc-*")]
}

fn config(action: &str) -> RoleConfig {
    RoleConfig::for_service("fc-service-role", "fc.aliyuncs.com")
        .with_policy(PolicyReference::by_name("AliyunOSSReadOnlyAccess"))
        .with_policy(PolicyReference::defined(
            "fc-log-writer",
            log_statement(action),
            Some("Write function logs".to_string()),
        ))
}

#[tokio::test]
async fn test_second_deploy_is_read_only() {
    let service = create_service();
    let reconciler = reconciler(&service);

    let first = reconciler.deploy(&config("log:PostLogStoreLogs")).await.unwrap();
    service.clear_calls();
    let second = reconciler.deploy(&config("log:PostLogStoreLogs")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, "acs:ram::1234567890:role/fc-service-role");
    assert!(service.mutations().is_empty(), "{:?}", service.mutations());
}

#[tokio::test]
async fn test_statement_order_is_not_drift() {
    let service = create_service();
    let reconciler = reconciler(&service);
    let forward = vec![
        Statement::new(Effect::Allow, "log:PostLogStoreLogs", "*"),
        Statement::new(Effect::Allow, "log:GetLogStore", "*"),
    ];
    let mut reversed = forward.clone();
    reversed.reverse();

    let role = |statement| {
        RoleConfig::for_service("fc-service-role", "fc.aliyuncs.com")
            .with_policy(PolicyReference::defined("fc-log-writer", statement, None))
    };
    reconciler.deploy(&role(forward)).await.unwrap();
    service.clear_calls();
    reconciler.deploy(&role(reversed)).await.unwrap();

    assert!(service.mutations().is_empty());
}

#[tokio::test]
async fn test_drift_writes_one_default_version() {
    let service = create_service();
    let reconciler = reconciler(&service);
    reconciler.deploy(&config("log:PostLogStoreLogs")).await.unwrap();
    service.clear_calls();

    reconciler.deploy(&config("log:GetLogStore")).await.unwrap();

    assert_eq!(
        service.mutations(),
        vec![Call::CreatePolicyVersion {
            name: "fc-log-writer".to_string(),
            set_default: true,
        }]
    );
    assert_eq!(service.count(Method::CreatePolicy), 0);

    let versions = service.versions("fc-log-writer");
    assert_eq!(versions.len(), 2);
    let default = versions.iter().find(|v| v.is_default).unwrap();
    assert!(PolicyDocument::from_json(&default.document)
        .unwrap()
        .matches(&log_statement("log:GetLogStore")));
}

#[tokio::test]
async fn test_version_ceiling_prunes_one_version() {
    let service = create_service();
    let reconciler = reconciler(&service);
    reconciler.deploy(&config("log:v1")).await.unwrap();

    // Fill the policy up to the ceiling with non-default versions
    for i in 2..=VERSION_CEILING {
        let document = PolicyDocument::new(log_statement(&format!("log:v{}", i)));
        service
            .create_policy_version("fc-log-writer", &document, false)
            .await
            .unwrap();
    }
    assert_eq!(service.versions("fc-log-writer").len(), VERSION_CEILING);
    service.clear_calls();

    reconciler.deploy(&config("log:next")).await.unwrap();

    assert_eq!(service.count(Method::DeletePolicyVersion), 1);
    assert_eq!(service.count(Method::CreatePolicyVersion), 1);
    let mutations = service.mutations();
    assert!(matches!(mutations[0], Call::DeletePolicyVersion { ref version_id, .. } if version_id == "v2"));
    assert!(matches!(mutations[1], Call::CreatePolicyVersion { set_default: true, .. }));

    let versions = service.versions("fc-log-writer");
    assert!(versions.len() <= VERSION_CEILING);
    assert_eq!(versions.iter().filter(|v| v.is_default).count(), 1);
}

#[tokio::test]
async fn test_present_attachment_is_not_repeated() {
    let service = create_service();
    let trust = ram_reconciler::TrustDocument::for_service("fc.aliyuncs.com");
    service.create_role("fc-service-role", &trust, None).await.unwrap();
    service
        .attach_policy_to_role(
            "AliyunOSSReadOnlyAccess",
            ram_reconciler::PolicyType::System,
            "fc-service-role",
        )
        .await
        .unwrap();
    service.clear_calls();

    reconciler(&service)
        .deploy(&config("log:PostLogStoreLogs"))
        .await
        .unwrap();

    let attached: Vec<_> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::AttachPolicyToRole { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(attached, vec!["fc-log-writer".to_string()]);
    assert_eq!(service.attached("fc-service-role").len(), 2);
}

#[tokio::test]
async fn test_system_policy_is_never_written() {
    let service = create_service();
    let reconciler = reconciler(&service);
    let config = RoleConfig::for_service("fc-service-role", "fc.aliyuncs.com")
        .with_policy(PolicyReference::by_name("AliyunOSSReadOnlyAccess"));

    reconciler.deploy(&config).await.unwrap();
    reconciler.deploy(&config).await.unwrap();
    reconciler.destroy(&config).await.unwrap();

    let writes = service
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call.method(),
                Method::CreatePolicy
                    | Method::CreatePolicyVersion
                    | Method::DeletePolicyVersion
                    | Method::DeletePolicy
            )
        })
        .count();
    assert_eq!(writes, 0);
    assert!(service
        .get_policy("AliyunOSSReadOnlyAccess", ram_reconciler::PolicyType::System)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_trust_drift_keeps_arn() {
    let service = create_service();
    let reconciler = reconciler(&service);
    let arn = reconciler.deploy(&config("log:PostLogStoreLogs")).await.unwrap();
    service.clear_calls();

    let mut moved = config("log:PostLogStoreLogs");
    moved.service = Some("oss.aliyuncs.com".to_string());
    let updated = reconciler.deploy(&moved).await.unwrap();

    assert_eq!(updated, arn);
    assert_eq!(
        service.mutations(),
        vec![Call::UpdateRole {
            name: "fc-service-role".to_string()
        }]
    );
}

#[tokio::test]
async fn test_negated_keys_reach_the_service() {
    let service = create_service();
    let config = ram_reconciler::ConfigFile::from_toml(
        r#"
[role]
name = "fc-service-role"
service = "fc.aliyuncs.com"
policies = [
    { name = "fc-oss-guard", statement = [{ Effect = "Deny", NotAction = ["oss:GetObject"], Resource = "*" }] },
]
"#,
    )
    .unwrap();

    reconciler(&service).deploy(&config.role).await.unwrap();

    let versions = service.versions("fc-oss-guard");
    let stored: serde_json::Value = serde_json::from_str(&versions[0].document).unwrap();
    assert_eq!(
        stored["Statement"][0],
        serde_json::json!({ "Effect": "Deny", "NotAction": ["oss:GetObject"], "Resource": "*" })
    );
}

#[tokio::test]
async fn test_extra_live_key_is_corrected() {
    let service = create_service();
    let reconciler = reconciler(&service);
    reconciler.deploy(&config("log:PostLogStoreLogs")).await.unwrap();

    // Someone narrows the live policy out of band
    let mut narrowed = log_statement("log:PostLogStoreLogs");
    narrowed[0].not_resource = Some("acs:log:*:*:project/secret".into());
    service
        .create_policy_version("fc-log-writer", &PolicyDocument::new(narrowed), true)
        .await
        .unwrap();
    service.clear_calls();

    reconciler.deploy(&config("log:PostLogStoreLogs")).await.unwrap();

    assert_eq!(
        service.mutations(),
        vec![Call::CreatePolicyVersion {
            name: "fc-log-writer".to_string(),
            set_default: true,
        }]
    );
    let versions = service.versions("fc-log-writer");
    let default = versions.iter().find(|v| v.is_default).unwrap();
    assert!(PolicyDocument::from_json(&default.document)
        .unwrap()
        .matches(&log_statement("log:PostLogStoreLogs")));
}
