//! End-to-end tests against a real Docker daemon and package index
//!
//! Ignored by default; run with `cargo test --test e2e_docker -- --ignored`.

mod support;

use std::process::{Command, Stdio};
use std::time::Duration;
use support::{fixture_path, free_port, slipway_bin, ContainerTestHarness};

const READY_TIMEOUT: Duration = Duration::from_secs(120);

async fn harness() -> Option<ContainerTestHarness> {
    let harness = ContainerTestHarness::new().ok()?;
    if harness.available().await {
        Some(harness)
    } else {
        eprintln!("Docker is not available, skipping");
        None
    }
}

fn unique_tag(name: &str) -> String {
    format!("slipway-e2e/{}:{}", name, uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn test_fastapi_service_builds_and_accepts_connections() {
    let Some(harness) = harness().await else {
        return;
    };
    let tag = unique_tag("shortener");

    let build = Command::new(slipway_bin())
        .args(["build", "-t", &tag, "--format", "json"])
        .arg(fixture_path("shortener"))
        .output()
        .expect("Failed to execute slipway build");
    assert!(
        build.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&build.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&build.stdout).unwrap();
    assert_eq!(report["tag"], tag.as_str());
    assert!(harness.image_exists(&tag).await);
    assert_eq!(
        harness
            .image_labels(&tag)
            .await
            .get("io.slipway.fingerprint")
            .map(String::as_str),
        report["fingerprint"].as_str()
    );
    assert!(harness.staging_tags().await.unwrap().is_empty());

    let port = free_port();
    let mut server = Command::new(slipway_bin())
        .args(["run", &tag, "-p", &port.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to execute slipway run");

    let ready = harness.wait_for_port(port, READY_TIMEOUT).await;

    let killed = Command::new("kill")
        .args(["-TERM", &server.id().to_string()])
        .status()
        .expect("Failed to send SIGTERM");
    assert!(killed.success());
    let status = server.wait().unwrap();

    ready.expect("server never accepted a TCP connection");
    assert_eq!(status.code(), Some(0));
    assert!(harness.managed_containers().await.unwrap().is_empty());

    harness.cleanup_image(&tag).await;
}

#[tokio::test]
#[ignore]
async fn test_unknown_package_fails_without_tag() {
    let Some(harness) = harness().await else {
        return;
    };
    let tag = unique_tag("unresolvable");

    for extra in [&[][..], &["--no-resolve"][..]] {
        let output = Command::new(slipway_bin())
            .args(["build", "-t", &tag])
            .args(extra)
            .arg(fixture_path("unresolvable"))
            .output()
            .expect("Failed to execute slipway build");

        let stderr = String::from_utf8_lossy(&output.stderr);
        assert_eq!(output.status.code(), Some(11), "{:?}: {}", extra, stderr);
        assert!(stderr.contains("doesnotexist"), "{}", stderr);
        assert!(!harness.image_exists(&tag).await);
    }
    assert!(harness.staging_tags().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_repeated_build_reuses_image() {
    let Some(harness) = harness().await else {
        return;
    };
    let tag = unique_tag("shortener");

    let build = || {
        let output = Command::new(slipway_bin())
            .args(["build", "-t", &tag, "--format", "json"])
            .arg(fixture_path("shortener"))
            .output()
            .expect("Failed to execute slipway build");
        assert!(output.status.success());
        serde_json::from_slice::<serde_json::Value>(&output.stdout).unwrap()
    };

    let first = build();
    let second = build();
    assert_eq!(first["image_id"], second["image_id"]);
    assert_eq!(first["fingerprint"], second["fingerprint"]);
    assert_eq!(second["reused"], true);

    harness.cleanup_image(&tag).await;
}
