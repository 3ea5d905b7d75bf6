//! The line protocol end to end: JSON in, JSON out, shutdown at end of input.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use workbench::{
    CommandResponse, CommandText, EditorEnvironment, EnvError, Environment, EnvironmentName,
    Registry, ScreenSection, Workbench,
};

/// Fails or panics on demand, and records that it was shut down.
#[derive(Debug, Default)]
struct Flaky {
    shut_down: Arc<AtomicBool>,
}

#[async_trait]
impl Environment for Flaky {
    async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError> {
        match command.instruction() {
            "fail" => Err(EnvError::Other("requested failure".to_string())),
            "panic" => panic!("requested panic"),
            other => Ok(CommandResponse::ok(other.to_uppercase())),
        }
    }

    fn screen(&mut self) -> Result<ScreenSection, EnvError> {
        Ok(ScreenSection::new((1..=8).map(|i| format!("row {i}")).collect::<Vec<_>>().join("\n"))
            .with_max_lines(3))
    }

    async fn shutdown(&mut self) -> Result<(), EnvError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

async fn serve(input: &str) -> (Vec<Value>, Arc<AtomicBool>, TempDir) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();

    let flaky = Flaky::default();
    let shut_down = flaky.shut_down.clone();
    let mut registry = Registry::new();
    registry
        .register(EnvironmentName::new("flaky").unwrap(), flaky)
        .unwrap();
    registry
        .register(
            EnvironmentName::new("editor").unwrap(),
            EditorEnvironment::new(dir.path()),
        )
        .unwrap();

    let mut output = Vec::new();
    Workbench::new(registry)
        .serve(input.as_bytes(), &mut output)
        .await
        .unwrap();

    let replies = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (replies, shut_down, dir)
}

#[tokio::test]
async fn test_every_reply_carries_every_screen() {
    let (replies, shut_down, _dir) = serve(concat!(
        r#"{"type":"command","environment":"flaky","command":"hello"}"#,
        "\n",
        r#"{"type":"command","env":"editor","command":"view notes.txt /^alpha/ /^beta/"}"#,
        "\n",
    ))
    .await;

    assert_eq!(replies.len(), 2);
    assert_eq!(
        replies[0]["response"],
        serde_json::json!({"output": "HELLO", "success": true})
    );
    for reply in &replies {
        assert_eq!(reply["type"], "response");
        let screen = reply["screen"].as_object().unwrap();
        assert_eq!(
            screen.keys().collect::<Vec<_>>(),
            vec!["editor", "flaky"]
        );
    }
    assert_eq!(
        replies[1]["screen"]["flaky"],
        serde_json::json!({"content": "row 1\nrow 2\n... (6 more lines, truncated)", "max_lines": 3})
    );
    assert!(
        replies[1]["screen"]["editor"]["content"]
            .as_str()
            .unwrap()
            .contains("     1  alpha\n     2  beta")
    );
    assert!(shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_environment_faults_stay_local() {
    let (replies, _, _dir) = serve(concat!(
        r#"{"type":"command","environment":"flaky","command":"fail"}"#,
        "\n",
        r#"{"type":"command","environment":"flaky","command":"panic"}"#,
        "\n",
        r#"{"type":"command","environment":"flaky","command":"still here"}"#,
        "\n",
    ))
    .await;

    assert_eq!(
        replies[0]["response"],
        serde_json::json!({"output": "Error: requested failure", "success": false})
    );
    assert_eq!(
        replies[1]["response"],
        serde_json::json!({"output": "Internal error: requested panic", "success": false})
    );
    assert_eq!(replies[2]["response"]["output"], "STILL HERE");
}

#[tokio::test]
async fn test_transport_errors_do_not_stop_the_loop() {
    let (replies, shut_down, _dir) = serve(concat!(
        "not json\n",
        "\n",
        "[1, 2]\n",
        r#"{"type":"command","environment":"flaky"}"#,
        "\n",
        r#"{"type":"command","environment":"9lives","command":"x"}"#,
        "\n",
        r#"{"type":"command","environment":"flaky","command":"ok"}"#,
        "\n",
    ))
    .await;

    assert_eq!(replies.len(), 5);
    for reply in &replies[..4] {
        assert_eq!(reply["type"], "error", "{reply}");
        assert!(reply["message"].is_string());
    }
    assert!(
        replies[0]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON")
    );
    assert_eq!(replies[4]["response"]["output"], "OK");
    assert!(shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unknown_environment_lists_sorted_names() {
    let (replies, _, _dir) =
        serve("{\"type\":\"command\",\"environment\":\"ruby\",\"command\":\"puts 1\"}\n").await;

    assert_eq!(
        replies[0]["response"],
        serde_json::json!({
            "output": "Unknown environment: ruby. Available environments: editor, flaky",
            "success": false
        })
    );
    assert_eq!(replies[0]["screen"].as_object().unwrap().len(), 2);
}
