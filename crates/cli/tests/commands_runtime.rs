use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use trustline_cli::commands::complaints::{self, ListOptions};
use trustline_cli::commands::{chat, doctor, index, migrate, seed};
use trustline_core::config::{AppConfig, LoadOptions};
use trustline_db::connect_from_config;

#[test]
fn migrate_returns_success_with_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("TRUSTLINE_DATABASE_URL", &database_url(dir.path()))], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_a_non_sqlite_url() {
    with_env(&[("TRUSTLINE_DATABASE_URL", "postgres://localhost/trustline")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("database.url"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("TRUSTLINE_DATABASE_URL", &database_url(dir.path()))], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success: {}", first.output);
        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");

        let first_payload = parse_payload(&first.output);
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
        let message = first_payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("  - ORD-001: Delivered order"));
        assert!(message.contains("  - ORD-005: Cancelled order"));
    });
}

#[test]
fn index_builds_then_refreshes_the_snapshot_and_doctor_sees_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let docs = dir.path().join("knowledge");
    fs::create_dir_all(&docs).expect("mkdir");
    fs::write(
        docs.join("refund-policy.md"),
        "# Refund policy\n\nRefunds are issued within 14 days of delivery for unused items.",
    )
    .expect("write");
    fs::write(
        docs.join("delivery.md"),
        "# Delivery\n\nOrders inside the city arrive within 2 working days.",
    )
    .expect("write");

    with_env(&[("TRUSTLINE_DATABASE_URL", &database_url(dir.path()))], || {
        let first = index::run(Some(docs.clone()));
        assert_eq!(first.exit_code, 0, "expected index success: {}", first.output);
        let message = parse_payload(&first.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.starts_with("knowledge snapshot v1: 2 indexed"), "{message}");

        let second = index::run(Some(docs.clone()));
        let message = parse_payload(&second.output)["message"].as_str().unwrap_or_default().to_string();
        assert!(message.starts_with("knowledge snapshot v2: 0 indexed, 2 unchanged"), "{message}");

        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be valid JSON");
        assert_eq!(report["overall_status"], "pass");
        let knowledge = report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "knowledge_snapshot"))
            .expect("knowledge check");
        assert_eq!(knowledge["status"], "pass");
        assert!(knowledge["details"].as_str().unwrap_or_default().starts_with("snapshot v2"));
    });
}

#[test]
fn index_fails_when_the_source_has_no_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_env(&[("TRUSTLINE_DATABASE_URL", &database_url(dir.path()))], || {
        let result = index::run(Some(dir.path().join("missing")));
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "knowledge_source");
    });
}

#[test]
fn chat_files_a_complaint_that_operators_can_review() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("TRUSTLINE_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let config = AppConfig::load(LoadOptions::default()).expect("config");
        let pool = runtime.block_on(connect_from_config(&config.database)).expect("pool");
        let support = runtime.block_on(chat::build_runtime(&config, &pool)).expect("support runtime");

        let script = "I want to file a complaint\nORD-001\n0791234567\nI have a complaint\n1\n\
                      The mug arrived with a cracked handle\n/quit\nthis line is never read\n";
        let mut transcript = Vec::new();
        let summary =
            chat::converse(&runtime, &support, script.as_bytes(), &mut transcript).expect("chat");
        runtime.block_on(pool.close());

        let transcript = String::from_utf8(transcript).expect("utf-8 transcript");
        assert_eq!(summary.turns, 6);
        assert_eq!(summary.complaints_filed.len(), 1);
        assert!(transcript.contains("assistant [complaint_finalized]>"), "{transcript}");
        assert!(!transcript.contains("never read"));
        let complaint_id = summary.complaints_filed[0].clone();

        let listed: Value = serde_json::from_str(
            &complaints::list(ListOptions { status: Some("open".to_string()), ..ListOptions::default() })
                .output,
        )
        .expect("list output should be JSON");
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(listed[0]["category"], "DamagedItem");

        let updated = complaints::update(
            complaint_id.clone(),
            "resolved".to_string(),
            Some("Replacement shipped".to_string()),
            None,
        );
        assert_eq!(updated.exit_code, 0, "{}", updated.output);
        assert!(parse_payload(&updated.output)["message"]
            .as_str()
            .unwrap_or_default()
            .contains("open -> resolved"));

        let reopened = complaints::update(complaint_id.clone(), "open".to_string(), None, None);
        assert_eq!(reopened.exit_code, 9);
        assert_eq!(parse_payload(&reopened.output)["error_class"], "invalid_transition");

        let detail: Value = serde_json::from_str(&complaints::show(complaint_id).output)
            .expect("show output should be JSON");
        let trail = detail["audit_trail"].as_array().expect("audit trail");
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1]["actor"], "operator");
        assert_eq!(detail["complaint"]["status"], "Resolved");

        let missing = complaints::show("CMP-20260101-000000-abcdef".to_string());
        assert_eq!(missing.exit_code, 8);
    });
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("trustline.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "TRUSTLINE_DATABASE_URL",
        "TRUSTLINE_DATABASE_MAX_CONNECTIONS",
        "TRUSTLINE_DATABASE_TIMEOUT_SECS",
        "TRUSTLINE_LLM_PROVIDER",
        "TRUSTLINE_LLM_API_KEY",
        "TRUSTLINE_LLM_BASE_URL",
        "TRUSTLINE_LLM_MODEL",
        "TRUSTLINE_EMBEDDING_BACKEND",
        "TRUSTLINE_EMBEDDING_DIMENSIONS",
        "TRUSTLINE_KNOWLEDGE_SOURCE_DIR",
        "TRUSTLINE_DIALOGUE_TRANSITIONS_PATH",
        "TRUSTLINE_SERVER_PORT",
        "TRUSTLINE_LOGGING_LEVEL",
        "TRUSTLINE_LOGGING_FORMAT",
        "TRUSTLINE_LOG_LEVEL",
        "TRUSTLINE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
