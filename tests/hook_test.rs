//! Tests for the hook calculator and its config.

use jobchain::calculator::{HookCalculator, HookConfig};
use jobchain::engine::{Calculator, Continuation};
use jobchain::error::Error;
use jobchain::model::{ItemId, RunId};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn work_dir() -> PathBuf {
    std::env::temp_dir().join(format!("jobchain-test-{}", uuid::Uuid::new_v4()))
}

fn shell_hook(script: &str, work_dir: PathBuf) -> HookCalculator {
    HookCalculator::new(HookConfig {
        name: "pricing".to_string(),
        command: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        env: BTreeMap::from([("PRICE_BOOK".to_string(), "2026".to_string())]),
        work_dir,
    })
}

#[test]
fn hook_config_parses_toml() {
    let config = HookConfig::parse(
        r#"
[calculator]
name = "pricing"
command = "hooks/calculate"
args = ["--mode", "full"]
work_dir = "/var/tmp/jobchain"

[calculator.env]
PRICE_BOOK = "2026"
"#,
    )
    .unwrap();

    assert_eq!(config.name, "pricing");
    assert_eq!(config.command, PathBuf::from("hooks/calculate"));
    assert_eq!(config.args, vec!["--mode", "full"]);
    assert_eq!(config.env["PRICE_BOOK"], "2026");
    assert_eq!(config.work_dir, PathBuf::from("/var/tmp/jobchain"));
}

#[test]
fn hook_config_defaults_optional_fields() {
    let config = HookConfig::parse(
        r#"
[calculator]
name = "pricing"
command = "calculate"
"#,
    )
    .unwrap();

    assert!(config.args.is_empty());
    assert!(config.env.is_empty());
    assert_eq!(config.work_dir, std::env::temp_dir().join("jobchain"));
}

#[test]
fn hook_config_requires_command() {
    assert!(HookConfig::parse("[calculator]\nname = \"pricing\"\n").is_err());
}

#[test]
fn hook_config_load_reports_missing_file() {
    let result = HookConfig::load(&work_dir().join("calculator.toml"));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn hook_output_is_delivered_through_the_continuation() {
    let dir = work_dir();
    let hook = shell_hook(
        r#"printf '{"item":"%s","book":"%s","input":%s}' "$JOBCHAIN_ITEM_ID" "$PRICE_BOOK" "$(cat input.json)" > output.json"#,
        dir.clone(),
    );
    let (continuation, dispatch) = Continuation::channel(RunId::new(), ItemId::from("Q-7"));

    hook.calculate(json!({ "net": 100 }), continuation)
        .await
        .unwrap();
    let completion = dispatch.wait(None).await.unwrap();

    assert_eq!(completion.item.as_str(), "Q-7");
    assert_eq!(
        completion.result,
        json!({ "item": "Q-7", "book": "2026", "input": { "net": 100 } })
    );
    // Per-item directory is cleaned up before the callback fires.
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn failing_hook_fails_the_calculation() {
    let dir = work_dir();
    let hook = shell_hook("exit 3", dir.clone());
    let (continuation, dispatch) = Continuation::channel(RunId::new(), ItemId::from("Q-8"));

    hook.calculate(json!({}), continuation).await.unwrap();
    let err = dispatch.wait(None).await.unwrap_err();

    assert!(matches!(err, Error::Calculate { ref message, .. } if message.contains("status 3")));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn hook_without_output_fails_the_calculation() {
    let dir = work_dir();
    let hook = shell_hook("true", dir.clone());
    let (continuation, dispatch) = Continuation::channel(RunId::new(), ItemId::from("Q-9"));

    hook.calculate(json!({}), continuation).await.unwrap();
    let err = dispatch.wait(None).await.unwrap_err();

    assert!(matches!(err, Error::Calculate { ref message, .. } if message.contains("output.json")));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn hook_is_killed_when_the_wait_times_out() {
    let dir = work_dir();
    let hook = shell_hook("sleep 10 && echo '{}' > output.json", dir.clone());
    let (continuation, dispatch) = Continuation::channel(RunId::new(), ItemId::from("Q-10"));
    let started = std::time::Instant::now();

    hook.calculate(json!({}), continuation).await.unwrap();
    let err = dispatch
        .wait(Some(std::time::Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CallbackTimeout { .. }));
    // The wait only returns once the hook task let go of the continuation.
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}
