//! Table-driven tests for configuration loading and validation.

use std::path::Path;

use stackcd::config::{load_config_from_str, validate_config};

struct ConfigTestCase {
    name: &'static str,
    config_yaml: &'static str,
    should_succeed: bool,
    /// Substring of the error message when loading fails.
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "empty_document_uses_defaults",
        config_yaml: "",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "inline_public_repo",
        config_yaml: r#"
repos:
  infra:
    url: https://git.example.com/infra.git
stacks:
  web:
    repo: infra
    compose_file: web/compose.yaml
"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "stack_references_unknown_repo",
        config_yaml: r#"
repos:
  infra:
    url: https://git.example.com/infra.git
stacks:
  web:
    repo: apps
"#,
        should_succeed: false,
        expected_error: Some("no such repo: apps"),
    },
    ConfigTestCase {
        name: "password_without_username",
        config_yaml: r#"
repos:
  infra:
    url: https://git.example.com/infra.git
    password: hunter2
"#,
        should_succeed: false,
        expected_error: Some("you must set username"),
    },
    ConfigTestCase {
        name: "username_without_password",
        config_yaml: r#"
repos:
  infra:
    url: https://git.example.com/infra.git
    username: deploy
"#,
        should_succeed: false,
        expected_error: Some("one of password or password_file"),
    },
    ConfigTestCase {
        name: "zero_update_interval",
        config_yaml: "update_interval: 0\n",
        should_succeed: false,
        expected_error: Some("update_interval"),
    },
    ConfigTestCase {
        name: "malformed_yaml",
        config_yaml: "repos: [infra\n",
        should_succeed: false,
        expected_error: Some("Failed to parse YAML"),
    },
];

#[test]
fn test_config_loading() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_yaml, Path::new("config.yaml"))
            .and_then(|mut config| validate_config(&mut config).map(|()| config));

        match (&result, case.should_succeed) {
            (Ok(_), true) => {}
            (Err(e), false) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "{}: expected error containing '{}', got '{}'",
                        case.name,
                        expected,
                        e
                    );
                }
            }
            (Ok(_), false) => panic!("{}: expected failure, config loaded", case.name),
            (Err(e), true) => panic!("{}: expected success, got {}", case.name, e),
        }
    }
}

#[test]
fn test_global_settings_are_read() {
    let mut config = load_config_from_str(
        r#"
update_interval: 30
concurrency: 0
auto_rotate: false
sops_secrets_discovery: true
environment: staging
vault_address: https://vault.example.com
vault_token_renew_interval: 7
"#,
        Path::new("config.yaml"),
    )
    .unwrap();
    validate_config(&mut config).unwrap();

    assert_eq!(config.update_interval, 30);
    assert_eq!(config.concurrency, 3);
    assert!(!config.auto_rotate);
    assert!(config.sops_secrets_discovery);
    assert_eq!(config.environment.as_deref(), Some("staging"));
    assert_eq!(config.vault_address.as_deref(), Some("https://vault.example.com"));
    assert_eq!(config.vault_token_renew_interval, 7);
    assert_eq!(config.sops_binary, "sops");
}
