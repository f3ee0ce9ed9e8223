use super::*;
use crate::config::MonitorConfig;
use crate::engine::tests::{DummyCamera, ScriptedClient};
use crate::events::MonitorEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.prompt.path = dir.path().join("risk_prompt.json").display().to_string();
    config.logging.directory = dir.path().join("temp").display().to_string();
    config.server.ip = "127.0.0.1".to_string();
    config.server.port = 0;
    config.analysis.font_path = "/nonexistent/font.ttf".to_string();
    config
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_initialize_registers_components() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = MonitorOrchestrator::with_components(
        create_test_config(&dir),
        Arc::new(DummyCamera::new()),
        Arc::new(ScriptedClient::answering("NO")),
    )
    .await
    .unwrap();

    orchestrator.initialize().await.unwrap();

    let states = orchestrator.component_states();
    assert_eq!(states.get("live_view"), Some(&ComponentState::Stopped));
    assert_eq!(states.get("http_server"), Some(&ComponentState::Stopped));
    assert!(!states.contains_key("keyboard"));
    assert!(dir.path().join("risk_prompt.json").exists());
}

#[tokio::test]
async fn test_initialize_fails_without_camera() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = MonitorOrchestrator::with_components(
        create_test_config(&dir),
        Arc::new(DummyCamera::failing()),
        Arc::new(ScriptedClient::answering("NO")),
    )
    .await
    .unwrap();

    assert!(orchestrator.initialize().await.is_err());
    assert_eq!(
        orchestrator.component_state("camera"),
        Some(ComponentState::Failed)
    );
}

#[tokio::test]
async fn test_component_state_tracking() {
    let dir = TempDir::new().unwrap();
    let orchestrator = MonitorOrchestrator::with_components(
        create_test_config(&dir),
        Arc::new(DummyCamera::new()),
        Arc::new(ScriptedClient::answering("NO")),
    )
    .await
    .unwrap();

    assert_eq!(orchestrator.component_state("live_view"), None);
    orchestrator.set_component_state("live_view", ComponentState::Running);
    assert_eq!(
        orchestrator.component_state("live_view"),
        Some(ComponentState::Running)
    );
}

#[tokio::test]
async fn test_control_events_drive_scheduler_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(ScriptedClient::answering("YES, the baby is climbing out"));
    let mut orchestrator = MonitorOrchestrator::with_components(
        create_test_config(&dir),
        Arc::new(DummyCamera::new()),
        client.clone(),
    )
    .await
    .unwrap();

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();
    assert_eq!(
        orchestrator.component_state("live_view"),
        Some(ComponentState::Running)
    );

    let bus = orchestrator.event_bus();
    let scheduler = orchestrator.scheduler();

    bus.publish(MonitorEvent::AnalyzeRequested {
        source: "test".to_string(),
    });
    assert!(eventually(|| client.calls.load(Ordering::SeqCst) >= 1).await);
    assert!(eventually(|| scheduler.engine().alert().state == crate::engine::AlertLevel::Risk).await);

    bus.publish(MonitorEvent::AcknowledgeRequested);
    assert!(eventually(|| scheduler.engine().alert().acknowledged_at.is_some()).await);

    bus.publish(MonitorEvent::AutoAnalysisToggleRequested);
    assert!(eventually(|| scheduler.settings().auto_analyze).await);

    bus.publish(MonitorEvent::ShutdownRequested {
        reason: "test".to_string(),
    });
    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 0);
    let states = orchestrator.component_states();
    assert_eq!(states.get("live_view"), Some(&ComponentState::Stopped));
    assert_eq!(states.get("http_server"), Some(&ComponentState::Stopped));
    assert_eq!(states.get("analysis"), Some(&ComponentState::Stopped));
    assert!(!scheduler.is_busy());
}

#[test]
fn test_shutdown_reason_exit_codes() {
    assert_eq!(ShutdownReason::Signal("SIGINT".to_string()).exit_code(), 0);
    assert_eq!(ShutdownReason::UserRequest("q".to_string()).exit_code(), 0);
    assert_eq!(ShutdownReason::Error("bind".to_string()).exit_code(), 1);
    assert_eq!(
        ShutdownReason::Signal("SIGTERM".to_string()).to_string(),
        "signal SIGTERM"
    );
}
