//! 控制面集成测试：装配、委派、会议、快照落盘与恢复

use std::sync::Arc;

use agency::config::AppConfig;
use agency::core::{AgencyBuilder, AgencyError, NewActor};
use agency::llm::ScriptedLlmClient;
use agency::memory::{Role, SnapshotFormat, SnapshotStore};
use tempfile::TempDir;

fn tool(name: &str, args: serde_json::Value) -> String {
    serde_json::json!({ "tool": name, "args": args }).to_string()
}

fn config_with_backend(backend: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.agency.default_backend = backend.to_string();
    config.agency.workspace_id = Some("workspace_test".to_string());
    config
}

#[tokio::test]
async fn test_delegation_survives_snapshot_file() {
    let script = Arc::new(ScriptedLlmClient::new([
        tool(
            "create_agent",
            serde_json::json!({"name": "reader", "directive": "You read logs."}),
        ),
        tool(
            "send_message",
            serde_json::json!({"agent_id": "1", "message": "summarize the logs"}),
        ),
        "Logs look clean.".to_string(),
        "Done.".to_string(),
    ]));
    let built = AgencyBuilder::new(config_with_backend("scripted"))
        .with_backend("scripted", script.clone())
        .build()
        .await
        .unwrap();
    assert!(built.warnings.is_empty());
    let agency = built.agency;

    let reply = agency.run("check the logs").await.unwrap();
    assert_eq!(reply, "Done.");
    assert_eq!(script.call_count(), 4);

    let child = agency.actor("1").await.unwrap();
    assert_eq!(child.parent_id.as_deref(), Some("0"));
    let contents: Vec<&str> = child.history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["You read logs.", "summarize the logs", "Logs look clean."]
    );

    let root = agency.actor("0").await.unwrap();
    assert_eq!(root.child_ids, vec!["1".to_string()]);
    assert_eq!(root.history.last().unwrap().content, "Done.");
    assert_eq!(root.history.last().unwrap().role, Role::Assistant);

    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());
    let path = store
        .save(&agency.save().await.unwrap(), SnapshotFormat::Yaml)
        .await
        .unwrap();
    let snapshot = SnapshotStore::load(&path).await.unwrap();

    let restored = AgencyBuilder::new(config_with_backend("scripted"))
        .with_backend("scripted", Arc::new(ScriptedLlmClient::new(["Back again."])))
        .with_snapshot(snapshot)
        .build()
        .await
        .unwrap();
    assert!(restored.warnings.is_empty());
    let restored = restored.agency;
    assert_eq!(restored.workspace_id(), "workspace_test");
    assert_eq!(restored.actors().await, agency.actors().await);

    let next = restored
        .create_actor("0", NewActor::new("writer", "You write."))
        .await
        .unwrap();
    assert_eq!(next, "2");
    assert_eq!(restored.send_message("1", "anything new?").await.unwrap(), "Back again.");
}

#[tokio::test]
async fn test_meeting_through_public_api() {
    let agency = AgencyBuilder::new(config_with_backend("mock"))
        .build()
        .await
        .unwrap()
        .agency;
    let root_id = agency.root_id().await;
    let offered_before = agency.offered_operations(&root_id).await.unwrap();

    let err = agency.call_meeting(&root_id, "Plan", 1).await.unwrap_err();
    assert!(matches!(err, AgencyError::NoParticipants(_)));

    agency
        .create_actor(&root_id, NewActor::new("analyst", "Analyze."))
        .await
        .unwrap();
    let summary = agency.call_meeting(&root_id, "Plan", 1).await.unwrap();

    assert!(summary.starts_with("Meeting complete. Summary:\n\n"));
    assert!(summary.contains("Meeting initialized with objective: Plan"));
    assert!(summary.contains("[analyst (1)]: "));
    assert_eq!(agency.meetings_in_flight(), 0);
    assert_eq!(agency.offered_operations(&root_id).await.unwrap(), offered_before);

    let root = agency.actor(&root_id).await.unwrap();
    assert_eq!(root.history.last().unwrap().content, summary);
}

#[tokio::test]
async fn test_unregistered_default_backend_is_rejected() {
    let err = AgencyBuilder::new(config_with_backend("nowhere"))
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AgencyError::Backend(_)));
}
