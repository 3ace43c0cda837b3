//! Integration test for the logging system
//!
//! Installs `LogCollector` as the global logger (once per test binary), runs a
//! full sequence against the fake device and checks the run log on disk.

#![cfg(unix)]

mod common;

use common::*;
use device_stager::{LogCollector, Phase, SequenceOrchestrator, SequenceStatus};
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_logging_integration_full_cycle() {
    let log_dir = TempDir::new().expect("Failed to create temp dir");
    let collector = LogCollector::new(log_dir.path(), false).expect("Failed to initialize LogCollector");
    collector
        .install(log::LevelFilter::Debug)
        .expect("Failed to register global logger");

    let mut server = mockito::Server::new_async().await;
    let _mocks = payload_service(&mut server).await;
    let staging = TempDir::new().unwrap();
    let device = FakeDevice::new(Behavior::default());

    let config = test_config(&format!("{}/get.php", server.url()), staging.path());
    let orchestrator = SequenceOrchestrator::from_config(device, &config).unwrap();
    let report = orchestrator.execute(async {}).await;
    assert_eq!(report.status, SequenceStatus::Succeeded, "{:?}", report);

    collector.wait_for_empty().await.expect("flush failed");
    let log_path = collector.log_path().expect("run log on disk");
    let content = fs::read_to_string(log_path).expect("Failed to read log file");

    // the success line appears exactly once
    let successes = content
        .lines()
        .filter(|line| line.contains("[OK] Sequence complete."))
        .count();
    assert_eq!(successes, 1, "log:\n{}", content);

    // phase banners in order
    let mut cursor = 0;
    for phase in Phase::SEQUENCE {
        let title = phase.title();
        let found = content[cursor..]
            .find(&title)
            .unwrap_or_else(|| panic!("missing or out of order: {}", title));
        cursor += found + title.len();
    }

    assert!(content.contains(&format!("[OK] Target token: {}", TOKEN)));
    assert!(content.contains("[INFO] Tunnel stopped."));
    // debug records reach the disk log
    assert!(content.contains("[DEBUG]"));
    assert!(!content.contains("[ERROR]"));
}
