//! Integration tests for configuration files and persisted identity state

use ram_reconciler::{
    ConfigFile, Effect, FailureKind, MemoryIdentityService, PolicyDocument, PolicyReference,
    PolicyType, Reconciler, Statement,
};
use std::fs;
use tempfile::TempDir;

const ROLE_TOML: &str = r#"
[role]
name = "fc-service-role"
service = "fc.aliyuncs.com"
policies = [
    "AliyunOSSReadOnlyAccess",
    { name = "fc-log-writer", statement = [{ Effect = "Allow", Action = ["log:PostLogStoreLogs"], Resource = "*" }] },
]

[settings]
attempt_timeout_secs = 5

[settings.retry]
retries = 0
min_timeout_ms = 0
max_timeout_ms = 0
"#;

const ROLE_JSON: &str = r#"{
  "role": {
    "name": "fc-service-role",
    "statement": [
      {
        "Action": "sts:AssumeRole",
        "Effect": "Allow",
        "Principal": { "Service": ["fc.aliyuncs.com"] }
      }
    ],
    "policies": [
      { "name": "fc-log-writer", "statement": [{ "Effect": "Allow", "Action": "log:PostLogStoreLogs", "Resource": "*" }] }
    ]
  }
}"#;

fn seed_state(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("state.json");
    let service = MemoryIdentityService::new("1234567890");
    let document = PolicyDocument::new(vec![Statement::new(Effect::Allow, "oss:Get*", "*")]);
    service
        .add_system_policy("AliyunOSSReadOnlyAccess", &document)
        .unwrap();
    service.save(&path).unwrap();
    path
}

#[test]
fn test_toml_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ram.toml");
    fs::write(&path, ROLE_TOML).unwrap();

    let config = ConfigFile::load(&path).unwrap();

    assert_eq!(config.role.name, "fc-service-role");
    assert_eq!(config.role.policies.len(), 2);
    assert!(!config.role.policies[0].is_owned());
    assert!(config.role.policies[1].is_owned());

    let policy = config.settings.retry_policy();
    assert_eq!(policy.retries, 0);
    assert_eq!(policy.attempt_timeout, Some(std::time::Duration::from_secs(5)));
}

#[test]
fn test_json_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ram.json");
    fs::write(&path, ROLE_JSON).unwrap();

    let config = ConfigFile::load(&path).unwrap();

    assert!(config.role.service.is_none());
    assert_eq!(config.role.trust_document().unwrap().statement.len(), 1);
    assert!(matches!(
        config.role.policies[0],
        PolicyReference::Defined { ref name, .. } if name == "fc-log-writer"
    ));
}

#[test]
fn test_malformed_config_is_invalid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ram.toml");
    fs::write(&path, "[role]\nservice = 3\n").unwrap();

    let err = ConfigFile::load(&path).unwrap_err();

    assert_eq!(err.kind(), FailureKind::Invalid);
}

#[tokio::test]
async fn test_deploy_against_persisted_state() {
    let dir = TempDir::new().unwrap();
    let state = seed_state(&dir);
    let config = ConfigFile::from_toml(ROLE_TOML).unwrap();

    let service = MemoryIdentityService::open(&state, "ignored").unwrap();
    let reconciler = Reconciler::new(service, config.settings.retry_policy());
    let arn = reconciler.deploy(&config.role).await.unwrap();
    reconciler.client().save(&state).unwrap();

    // A fresh process sees the deployed role and changes nothing
    let reopened = MemoryIdentityService::open(&state, "ignored").unwrap();
    let reconciler = Reconciler::new(reopened.clone(), config.settings.retry_policy());
    assert_eq!(reconciler.deploy(&config.role).await.unwrap(), arn);
    assert!(reopened.mutations().is_empty());

    let attached = reopened.attached("fc-service-role");
    assert!(attached
        .iter()
        .any(|p| p.name == "AliyunOSSReadOnlyAccess" && p.policy_type == PolicyType::System));
    assert!(attached
        .iter()
        .any(|p| p.name == "fc-log-writer" && p.policy_type == PolicyType::Custom));
}

#[tokio::test]
async fn test_destroy_against_persisted_state() {
    let dir = TempDir::new().unwrap();
    let state = seed_state(&dir);
    let config = ConfigFile::from_toml(ROLE_TOML).unwrap();

    let service = MemoryIdentityService::open(&state, "ignored").unwrap();
    let reconciler = Reconciler::new(service, config.settings.retry_policy());
    reconciler.deploy(&config.role).await.unwrap();
    reconciler.destroy(&config.role).await.unwrap();
    reconciler.client().save(&state).unwrap();

    let reopened = MemoryIdentityService::load(&state).unwrap();
    assert!(reopened.role("fc-service-role").is_none());
    assert!(!reopened.custom_policy_exists("fc-log-writer"));
}

#[test]
fn test_unknown_statement_key_is_rejected() {
    let text = r#"
[role]
name = "fc-service-role"
service = "fc.aliyuncs.com"
policies = [
    { name = "fc-oss-guard", statement = [{ Effect = "Deny", Action = "oss:*", Resource = "*", NotPrincipal = "x" }] },
]
"#;

    let err = ConfigFile::from_toml(text).unwrap_err();

    assert_eq!(err.kind(), FailureKind::Invalid);
}
