use adequate::api::{self, AppState};
use adequate::{server, Store, Tracer, TracerConfig};
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::oneshot;

#[derive(serde::Deserialize)]
struct VersionResponse {
    version: i64,
}

#[tokio::test]
async fn test_serve_and_graceful_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(
        &temp_dir.path().join("data").join("db"),
        Tracer::new(TracerConfig::default()),
    )
    .await
    .unwrap();
    let store = Arc::new(store);
    let app = api::create_router(AppState::new(store.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve_with_listener(listener, app, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/migrations/version", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: VersionResponse = resp.json().await.unwrap();
    assert_eq!(body.version, 1);

    let resp = client
        .get(format!("{}/api/healthz", base_url))
        .header("X-Request-Id", "e2e-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "e2e-1");
    assert_eq!(resp.text().await.unwrap(), "OK");

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(15), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok(), "{:?}", result);
    store.close().await;

    assert!(reqwest::get(format!("{}/api/healthz", base_url)).await.is_err());
}

/// Pull the bound address out of the `listening` log line.
fn listen_addr(line: &str) -> Option<SocketAddr> {
    if !line.contains("listening") {
        return None;
    }
    let rest = &line[line.find("addr=")? + "addr=".len()..];
    rest.split_whitespace().next()?.trim_matches('"').parse().ok()
}

#[test]
fn test_listen_addr() {
    assert_eq!(
        listen_addr("2024-01-01T00:00:00.000+00:00  INFO src/server.rs:62: listening addr=127.0.0.1:4242"),
        Some("127.0.0.1:4242".parse().unwrap())
    );
    assert_eq!(listen_addr("INFO started app duration=1ms"), None);
}

#[cfg(unix)]
#[tokio::test]
async fn test_binary_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("app.db");

    let mut child = Command::new(env!("CARGO_BIN_EXE_adequate"))
        .arg("--http-listen-addr=127.0.0.1:0")
        .arg("--store-sqlite-path")
        .arg(&db_path)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn app");

    let stdout = child.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();

    let addr = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(line) = lines.next_line().await.unwrap() {
            if let Some(addr) = listen_addr(&line) {
                return addr;
            }
        }
        panic!("app exited before listening");
    })
    .await
    .expect("app did not start listening");

    let body: VersionResponse = reqwest::get(format!("http://{}/api/migrations/version", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.version, 1);
    assert!(db_path.exists());

    let pid = child.id().unwrap().to_string();
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid])
        .status()
        .unwrap();
    assert!(status.success());

    let rest = tokio::time::timeout(Duration::from_secs(15), async {
        let mut rest = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            rest.push(line);
        }
        rest
    })
    .await
    .expect("app kept writing logs after SIGTERM");
    let exit = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("app did not exit")
        .unwrap();

    assert!(exit.success(), "{:?}", exit);
    assert!(
        rest.iter().any(|l| l.contains("graceful shutdown completed")),
        "{:?}",
        rest
    );
}
