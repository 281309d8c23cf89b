//! The `switchyard` binary under real termination signals.
#![cfg(unix)]

use std::net::{SocketAddr, TcpListener};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn(port: u16, shutdown_timeout_secs: u64) -> Child {
    Command::new(env!("CARGO_BIN_EXE_switchyard"))
        .env("PORT", port.to_string())
        .env("LOG_LEVEL", "warn")
        .env("LOG_FORMAT", "json")
        .env("SHUTDOWN_TIMEOUT_SECS", shutdown_timeout_secs.to_string())
        .env_remove("STATIC_DIR")
        .env_remove("API_PREFIX")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap()
}

async fn wait_listening(addr: SocketAddr) {
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("switchyard did not start listening on {addr}");
}

fn send_signal(child: &Child, signal: &str) {
    let pid = child.id().unwrap();
    let status = std::process::Command::new("kill")
        .args([signal, &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

async fn wait_exit(child: &mut Child) -> ExitStatus {
    tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("switchyard did not exit")
        .unwrap()
}

#[tokio::test]
async fn test_sigint_idle_server_exits_zero() {
    let port = free_port();
    let mut child = spawn(port, 5);
    wait_listening(SocketAddr::from(([127, 0, 0, 1], port))).await;

    send_signal(&child, "-INT");
    let status = wait_exit(&mut child).await;
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_sigterm_after_completed_request_exits_zero() {
    let port = free_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut child = spawn(port, 5);
    wait_listening(addr).await;

    let body = r#"{"message":"hi"}"#;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /api/v1/APIService/Ping HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("Pong: hi"));

    send_signal(&child, "-TERM");
    let status = wait_exit(&mut child).await;
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_sigterm_with_stuck_request_forces_drain_and_exits_zero() {
    let port = free_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut child = spawn(port, 1);
    wait_listening(addr).await;

    // the body never completes, so the request stays in flight
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"POST /api/v1/APIService/Ping HTTP/1.1\r\nHost: localhost\r\n\
              Content-Type: application/json\r\nContent-Length: 64\r\n\r\n{",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let signalled = Instant::now();
    send_signal(&child, "-TERM");
    let status = wait_exit(&mut child).await;
    assert_eq!(status.code(), Some(0));
    assert!(signalled.elapsed() >= Duration::from_millis(900));

    // the stuck connection was closed, not left hanging
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap();
    assert!(read.is_err() || buf.is_empty());
}

#[tokio::test]
async fn test_invalid_configuration_exits_one() {
    let status = Command::new(env!("CARGO_BIN_EXE_switchyard"))
        .env("LOG_FORMAT", "xml")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
