//! Process boundaries against the real `courier worker` binary

use courier_core::ContractId;
use courier_host::boundary::{BoundaryFactory, IsolationBoundary, ProcessBoundaryFactory};
use courier_host::error::{InvocationError, LoadError};
use courier_host::lifecycle::{LifecycleManager, LifecycleSettings, LifecycleState};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

fn worker_factory() -> ProcessBoundaryFactory {
    ProcessBoundaryFactory::new(env!("CARGO_BIN_EXE_courier")).with_invoke_timeout(Some(Duration::from_secs(10)))
}

async fn worker_boundary() -> Box<dyn IsolationBoundary> {
    worker_factory().create().await.unwrap()
}

#[tokio::test]
async fn test_empty_directory_through_a_worker() {
    let dir = TempDir::new().unwrap();
    let mut manager = LifecycleManager::new(Arc::new(worker_factory()), LifecycleSettings::default())
        .await
        .unwrap();

    let report = manager.load(dir.path()).await.unwrap();
    assert!(report.providers.is_empty());
    assert_eq!(report.scan.modules_loaded, 0);
    assert_eq!(manager.state(), LifecycleState::Loaded);

    let run = manager.run().await.unwrap();
    assert!(run.invoked.is_empty());

    let before = manager.boundary_id();
    manager.unload().await;
    assert_eq!(manager.state(), LifecycleState::Unloaded);
    assert!(manager.boundary_id().is_some());
    assert_ne!(manager.boundary_id(), before);
}

#[tokio::test]
async fn test_directory_errors_cross_the_protocol() {
    let temp_dir = TempDir::new().unwrap();
    let mut boundary = worker_boundary().await;

    let err = boundary.scan(&temp_dir.path().join("missing")).await.unwrap_err();
    assert!(matches!(err, LoadError::DirectoryUnreadable { .. }));

    let file = temp_dir.path().join("plain.txt");
    std::fs::write(&file, "text").unwrap();
    let err = boundary.scan(&file).await.unwrap_err();
    assert!(matches!(err, LoadError::NotADirectory { .. }));

    // The worker survives request-level errors
    let report = boundary.scan(temp_dir.path()).await.unwrap();
    assert!(report.errors.is_empty());
    boundary.teardown().await;
}

#[tokio::test]
async fn test_corrupt_module_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("libcorrupt.so"), b"definitely not a shared library").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let mut boundary = worker_boundary().await;
    let report = boundary.scan(dir.path()).await.unwrap();
    assert_eq!(report.modules_loaded, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].path.ends_with("libcorrupt.so"));

    let providers = boundary.resolve(&ContractId::message_sender()).await.unwrap();
    assert!(providers.is_empty());
    boundary.teardown().await;
}

#[tokio::test]
async fn test_teardown_kills_the_worker() {
    let mut boundary = worker_boundary().await;
    boundary.teardown().await;

    let err = boundary.invoke(0, "x").await.unwrap_err();
    assert!(matches!(err, InvocationError::BoundaryLost { .. }));
    let err = boundary.resolve(&ContractId::message_sender()).await.unwrap_err();
    assert!(matches!(err, LoadError::BoundaryLost { .. }));
}

#[tokio::test]
async fn test_slot_errors_cross_the_protocol() {
    let mut boundary = worker_boundary().await;
    let err = boundary.invoke(3, "x").await.unwrap_err();
    assert_eq!(err, InvocationError::SlotOutOfRange { index: 3, len: 0 });
    boundary.teardown().await;
}

#[tokio::test]
async fn test_worker_answers_malformed_requests_and_exits_on_eof() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_courier"))
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"{\"op\":\"ping\"}\nnot json\n").await.unwrap();
    drop(stdin);

    let mut output = String::new();
    child.stdout.take().unwrap().read_to_string(&mut output).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());

    let lines: Vec<serde_json::Value> = output.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["status"], "pong");
    assert_eq!(lines[0]["abi_version"], courier_core::ABI_VERSION);
    assert_eq!(lines[1]["status"], "failed");
    assert_eq!(lines[1]["error"]["kind"], "protocol");
}

fn build_demo(name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let demo_dir = manifest_dir
        .parent()
        .and_then(Path::parent)
        .ok_or("workspace root not found")?
        .join("demos")
        .join(name);
    // Demos are their own workspaces; pin the target directory so an inherited
    // CARGO_TARGET_DIR does not move the output
    let target_dir = demo_dir.join("target");

    let output = std::process::Command::new(option_env!("CARGO").unwrap_or("cargo"))
        .arg("build")
        .arg("--release")
        .arg("--manifest-path")
        .arg(demo_dir.join("Cargo.toml"))
        .arg("--target-dir")
        .arg(&target_dir)
        .output()?;
    if !output.status.success() {
        return Err(format!("Failed to build {name}: {}", String::from_utf8_lossy(&output.stderr)).into());
    }

    let crate_name = format!("courier_{}", name.replace('-', "_"));
    #[cfg(target_os = "macos")]
    let lib_name = format!("lib{crate_name}.dylib");
    #[cfg(target_os = "linux")]
    let lib_name = format!("lib{crate_name}.so");
    #[cfg(target_os = "windows")]
    let lib_name = format!("{crate_name}.dll");

    let lib_path = target_dir.join("release").join(lib_name);
    if !lib_path.exists() {
        return Err(format!("Built library not found at {}", lib_path.display()).into());
    }
    Ok(lib_path)
}

/// Build both demo modules and copy them into a fresh plugin directory
fn demo_plugin_dir() -> TempDir {
    let plugins = TempDir::new().unwrap();
    for demo in ["email-sender", "sms-sender"] {
        let lib = build_demo(demo).unwrap_or_else(|e| panic!("{e}"));
        std::fs::copy(&lib, plugins.path().join(lib.file_name().unwrap())).unwrap();
    }
    plugins
}

#[tokio::test]
async fn test_demo_providers_end_to_end() {
    let plugins = demo_plugin_dir();

    let mut manager = LifecycleManager::new(Arc::new(worker_factory()), LifecycleSettings::default())
        .await
        .unwrap();
    let report = manager.load(plugins.path()).await.unwrap();
    assert_eq!(report.scan.modules_loaded, 2);
    assert!(report.scan.errors.is_empty());
    assert_eq!(manager.run().await.unwrap().invoked, vec!["email", "sms"]);

    // Both demos print to stdout while sending; the second run still works
    assert_eq!(manager.run().await.unwrap().invoked, vec!["email", "sms"]);
    manager.unload().await;

    let settings = LifecycleSettings {
        contract: ContractId::message_sender_v2(),
        ..Default::default()
    };
    let mut v2 = LifecycleManager::new(Arc::new(worker_factory()), settings).await.unwrap();
    v2.load(plugins.path()).await.unwrap();
    assert_eq!(v2.run().await.unwrap().invoked, vec!["email"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_provider_stdout_goes_to_worker_stderr() {
    let plugins = demo_plugin_dir();
    let mut child = Command::new(env!("CARGO_BIN_EXE_courier"))
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let requests = [
        serde_json::json!({"op": "scan", "dir": plugins.path()}),
        serde_json::json!({"op": "resolve", "contract": "message-sender"}),
        serde_json::json!({"op": "invoke", "index": 0, "message": "over the wire"}),
        serde_json::json!({"op": "invoke", "index": 1, "message": "over the wire"}),
    ];
    let mut stdin = child.stdin.take().unwrap();
    for request in &requests {
        stdin.write_all(format!("{request}\n").as_bytes()).await.unwrap();
    }
    drop(stdin);

    let output = tokio::time::timeout(Duration::from_secs(30), child.wait_with_output())
        .await
        .unwrap()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let replies: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap_or_else(|e| panic!("non-protocol line {line:?}: {e}")))
        .collect();
    let statuses: Vec<_> = replies.iter().map(|r| r["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["scanned", "resolved", "invoked", "invoked"]);
    assert_eq!(replies[2]["provider"], "email");
    assert_eq!(replies[3]["provider"], "sms");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("EmailSender: over the wire"), "stderr: {stderr}");
    assert!(stderr.contains("SmsSender: over the wire"), "stderr: {stderr}");
}
