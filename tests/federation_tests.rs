#![cfg(unix)]

mod common;

use common::fast_config;
use simbus::federation::{REGISTRY_LOG, SYSTEM_CONTROLLER_LOG};
use simbus::time_sync::TIME_MASTER_PARTICIPANT;
use simbus::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// Writing an executable while another thread spawns can fail with ETXTBSY.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

const LONG_RUNNING: &str = "echo \"$@\"\nexec sleep 30\n";

fn stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn federation_config(dir: &TempDir, registry: &str) -> SimbusConfig {
    let mut config = fast_config().with_port(8600);
    let fed = &mut config.federation;
    fed.registry_executable = stub(dir.path(), "registry.sh", registry);
    fed.system_controller_executable = stub(dir.path(), "system_controller.sh", LONG_RUNNING);
    fed.monitor_executable = stub(
        dir.path(),
        "monitor.sh",
        "echo \"$@\" > \"$(dirname \"$0\")/monitor.args\"\nexec sleep 30\n",
    );
    fed.log_dir = dir.path().join("logs");
    fed.startup_grace_ms = 300;
    fed.wait_for_registry = false;
    config
}

fn start(config: SimbusConfig, participants: &[&str]) -> Result<Federation> {
    let transport = Arc::new(InProcessRegistry::new(config.registry_uri.clone())?);
    Federation::start(transport, config, participants)
}

#[test]
fn test_federation_launches_tools_with_arguments() {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let config = federation_config(&dir, LONG_RUNNING);
    let logs = config.federation.log_dir.clone();

    let mut federation = start(config, &["Test1", "Test2"]).unwrap();
    federation.check_health().unwrap();
    assert!(federation.session().is_registered(TIME_MASTER_PARTICIPANT));
    assert_eq!(
        federation.log_files(),
        vec![logs.join(REGISTRY_LOG), logs.join(SYSTEM_CONTROLLER_LOG)]
    );

    let registry_log = fs::read_to_string(logs.join(REGISTRY_LOG)).unwrap();
    assert_eq!(registry_log.trim(), "--listen-uri silkit://localhost:8600 --log trace");
    let controller_log = fs::read_to_string(logs.join(SYSTEM_CONTROLLER_LOG)).unwrap();
    assert_eq!(
        controller_log.trim(),
        "--name SystemController --connect-uri silkit://localhost:8600 --log trace Test1 Test2"
    );
    assert!(!dir.path().join("monitor.args").exists());

    let session = federation.session().clone();
    federation.shutdown();
    assert!(!session.is_registered(TIME_MASTER_PARTICIPANT));
}

#[test]
fn test_registry_exiting_during_startup_is_reported() {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let config = federation_config(&dir, "exit 3\n");
    let logs = config.federation.log_dir.clone();

    let err = start(config, &[]).err().unwrap();
    match err {
        Error::ProcessExited { name, status } => {
            assert_eq!(name, "registry");
            assert_eq!(status.code(), Some(3));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!logs.join(SYSTEM_CONTROLLER_LOG).exists());
}

#[test]
fn test_missing_system_controller_is_reported() {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let mut config = federation_config(&dir, LONG_RUNNING);
    config.federation.system_controller_executable = dir.path().join("does-not-exist");

    let err = start(config, &[]).err().unwrap();
    assert!(matches!(err, Error::Process { ref name, .. } if name == "system controller"));
}

#[test]
fn test_monitor_launched_on_request() {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let mut config = federation_config(&dir, LONG_RUNNING);
    config.federation.launch_monitor = true;

    let mut federation = start(config, &[]).unwrap();
    let args = fs::read_to_string(dir.path().join("monitor.args")).unwrap();
    assert_eq!(args.trim(), "--name SystemMonitor --connect-uri silkit://localhost:8600");
    federation.check_health().unwrap();
    federation.shutdown();
}

#[test]
fn test_health_check_detects_crash() {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let config = federation_config(&dir, "sleep 1\nexit 7\n");

    let mut federation = start(config, &[]).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let err = loop {
        match federation.check_health() {
            Err(e) => break e,
            Ok(()) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(50)),
            Ok(()) => panic!("registry crash was not detected"),
        }
    };
    assert!(matches!(err, Error::ProcessExited { ref name, .. } if name == "registry"));
}

#[test]
fn test_without_launch_only_the_time_master_runs() {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let mut config = federation_config(&dir, LONG_RUNNING);
    config.federation.launch_processes = false;
    let logs = config.federation.log_dir.clone();

    let mut federation = start(config, &["Test1"]).unwrap();
    assert!(!logs.exists());
    federation.check_health().unwrap();
    assert_eq!(federation.session().participant_names(), vec![TIME_MASTER_PARTICIPANT.to_string()]);

    let mut worker = federation.session().create_participant(Some("Test1")).unwrap();
    assert!(worker.add_can_controller(None, None).is_ok());
    drop(worker);
    federation.shutdown();
}
