//! End-to-end tests: a real target, the harness in between, and a client.

use seqproxy::{Harness, HarnessError, Phase, TestPlan};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Target answering every connection with `response`, reporting each
/// request head it received.
async fn start_target(response: &'static [u8]) -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
                let _ = stream.write_all(response).await;
                let _ = stream.flush().await;
            });
        }
    });
    (port, rx)
}

fn plan(json: &str, target_port: u16) -> TestPlan {
    let plan: TestPlan = json.parse().expect("test plan should parse");
    plan.with_target_port(target_port)
}

/// Send `request` on a fresh connection and read until the harness closes it.
async fn raw_exchange(port: u16, request: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .expect("harness should close the connection")
        .unwrap();
    received
}

const OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

#[tokio::test]
async fn test_single_assertion_passes_and_relays_response() {
    let (target_port, mut heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(r#"{"Tests": [{"ExpectedPath": "/health"}]}"#, target_port))
        .bind()
        .await
        .unwrap();
    let port = bound.port();
    let phase = bound.phase();
    let run = tokio::spawn(bound.run());

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();
    let response = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.assertions, 1);
    assert_eq!(summary.port, port);
    assert_eq!(*phase.borrow(), Phase::Completed);

    let head = heads.recv().await.unwrap();
    assert!(head.starts_with("GET /health HTTP/1.1\r\n"), "{head}");
}

#[tokio::test]
async fn test_relay_is_byte_identical() {
    const RAW: &[u8] = b"HTTP/1.1 200 OK\r\nZ-First: 1\r\nx-MiXeD-Case: yes\r\nTransfer-Encoding: chunked\r\nA-Last: 2\r\n\r\n2\r\nok\r\n0\r\n\r\n";
    let (target_port, _heads) = start_target(RAW).await;
    let bound = Harness::new(plan(r#"{"Tests": [{}]}"#, target_port))
        .bind()
        .await
        .unwrap();
    let port = bound.port();
    let run = tokio::spawn(bound.run());

    let received = raw_exchange(port, "GET /anything HTTP/1.1\r\nHost: example\r\n\r\n").await;
    assert_eq!(received, RAW);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_requests_consumed_in_declared_order() {
    let (target_port, mut heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(
        r#"{"Tests": [
            {"ExpectedPath": "/first", "RequiredHeaders": {"X-Step": ["1"]}},
            {"ExpectedPath": "/second", "RequiredHeaders": {"X-Step": ["2"]}}
        ]}"#,
        target_port,
    ))
    .bind()
    .await
    .unwrap();
    let port = bound.port();
    let run = tokio::spawn(bound.run());

    let first = raw_exchange(port, "GET /first HTTP/1.1\r\nHost: h\r\nX-Step: 1\r\n\r\n").await;
    assert_eq!(first, OK_RESPONSE);
    let second = raw_exchange(
        port,
        "POST /second HTTP/1.1\r\nHost: h\r\nX-Step: 2\r\nContent-Length: 4\r\n\r\nbody",
    )
    .await;
    assert_eq!(second, OK_RESPONSE);

    run.await.unwrap().unwrap();
    assert!(heads.recv().await.unwrap().starts_with("GET /first "));
    let second_head = heads.recv().await.unwrap();
    assert!(second_head.starts_with("POST /second "), "{second_head}");
    // Header casing from the caller is kept on the forwarded request.
    assert!(second_head.contains("X-Step: 2\r\n"), "{second_head}");
}

#[tokio::test]
async fn test_unexpected_path_fails_run() {
    let (target_port, _heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(r#"{"Tests": [{"ExpectedPath": "/a"}]}"#, target_port))
        .bind()
        .await
        .unwrap();
    let port = bound.port();
    let phase = bound.phase();
    let run = tokio::spawn(bound.run());

    let response = raw_exchange(port, "GET /b HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 502"), "{response}");

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, HarnessError::PathMismatch { .. }));
    let message = err.to_string();
    assert!(message.contains("/a") && message.contains("/b"), "{message}");
    assert_eq!(*phase.borrow(), Phase::Failed);
}

#[tokio::test]
async fn test_timeout_when_plan_not_finished() {
    let (target_port, _heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(
        r#"{"Tests": [{}, {}], "Timeout": "500ms"}"#,
        target_port,
    ))
    .bind()
    .await
    .unwrap();
    let port = bound.port();
    let started = Instant::now();
    let run = tokio::spawn(bound.run());

    let received = raw_exchange(port, "GET / HTTP/1.1\r\nHost: h\r\n\r\n").await;
    assert_eq!(received, OK_RESPONSE);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, HarnessError::Timeout(_)));
    assert!(err.to_string().contains("timed out"));
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_missing_required_header_fails_run() {
    let (target_port, mut heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(
        r#"{"Tests": [{"RequiredHeaders": {"X-Token": ["abc"]}}]}"#,
        target_port,
    ))
    .bind()
    .await
    .unwrap();
    let port = bound.port();
    let run = tokio::spawn(bound.run());

    raw_exchange(port, "GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;

    let err = run.await.unwrap().unwrap_err();
    assert!(
        matches!(err, HarnessError::HeaderMissing { ref name, .. } if name == "X-Token"),
        "{err}"
    );
    assert!(err.to_string().contains("X-Token"));
    // Nothing reached the target.
    assert!(heads.try_recv().is_err());
}

#[tokio::test]
async fn test_header_value_mismatch_fails_run() {
    let (target_port, _heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(
        r#"{"Tests": [{"RequiredHeaders": {"Accept": ["a", "b"]}}]}"#,
        target_port,
    ))
    .bind()
    .await
    .unwrap();
    let port = bound.port();
    let run = tokio::spawn(bound.run());

    raw_exchange(
        port,
        "GET / HTTP/1.1\r\nHost: h\r\nAccept: b\r\nAccept: a\r\nConnection: close\r\n\r\n",
    )
    .await;

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, HarnessError::HeaderMismatch { .. }), "{err}");
}

#[tokio::test]
async fn test_unreachable_target_fails_run() {
    let closed_port = {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    };
    let bound = Harness::new(plan(r#"{"Tests": [{}]}"#, closed_port))
        .bind()
        .await
        .unwrap();
    let port = bound.port();
    let run = tokio::spawn(bound.run());

    raw_exchange(port, "GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").await;

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, HarnessError::UpstreamForward { .. }), "{err}");
}

#[tokio::test]
async fn test_plan_loaded_from_file() {
    use std::io::Write;

    let (target_port, _heads) = start_target(OK_RESPONSE).await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"Tests": [{{"ExpectedPath": "/f"}}], "TargetPort": {target_port}, "Timeout": "5s"}}"#
    )
    .unwrap();

    let plan = TestPlan::load(file.path().to_str().unwrap()).unwrap();
    let bound = Harness::new(plan).bind().await.unwrap();
    let port = bound.port();
    let run = tokio::spawn(bound.run());

    let received = raw_exchange(port, "GET /f HTTP/1.1\r\nHost: h\r\n\r\n").await;
    assert_eq!(received, OK_RESPONSE);
    run.await.unwrap().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_driver_command_receives_resolved_port() {
    let dir = tempfile::tempdir().unwrap();
    let json = format!(
        r#"{{"Tests": [], "TargetPort": 1, "Commands": ["touch {}/%port"]}}"#,
        dir.path().display()
    );
    let bound = Harness::new(json.parse().unwrap()).bind().await.unwrap();
    let port = bound.port();

    bound.run().await.unwrap();
    assert!(dir.path().join(port.to_string()).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_commands_still_running_at_completion_finish_first() {
    let (target_port, _heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(
        r#"{"Tests": [{"ExpectedPath": "/a"}], "Commands": ["sleep 0.5"], "Timeout": "5s"}"#,
        target_port,
    ))
    .bind()
    .await
    .unwrap();
    let port = bound.port();
    let phase = bound.phase();
    let started = Instant::now();
    let run = tokio::spawn(bound.run());

    let received = raw_exchange(port, "GET /a HTTP/1.1\r\nHost: h\r\n\r\n").await;
    assert_eq!(received, OK_RESPONSE);

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.assertions, 1);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(*phase.borrow(), Phase::Completed);
}

#[cfg(unix)]
#[tokio::test]
async fn test_extra_request_after_completion_fails_run() {
    let (target_port, _heads) = start_target(OK_RESPONSE).await;
    let bound = Harness::new(plan(
        r#"{"Tests": [{"ExpectedPath": "/a"}], "Commands": ["sleep 1"], "Timeout": "5s"}"#,
        target_port,
    ))
    .bind()
    .await
    .unwrap();
    let port = bound.port();
    let phase = bound.phase();
    let run = tokio::spawn(bound.run());

    // Accepted before the plan completes, used only afterwards.
    let mut idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let received = raw_exchange(port, "GET /a HTTP/1.1\r\nHost: h\r\n\r\n").await;
    assert_eq!(received, OK_RESPONSE);

    idle.write_all(b"GET /extra HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed without a response");
        head.extend_from_slice(&buf[..n]);
    }
    assert!(head.starts_with(b"HTTP/1.1 502"));

    let err = run.await.unwrap().unwrap_err();
    assert!(
        matches!(
            err,
            HarnessError::PlanExhausted {
                total: 1,
                received: 2
            }
        ),
        "{err}"
    );
    assert_eq!(*phase.borrow(), Phase::Failed);
}
