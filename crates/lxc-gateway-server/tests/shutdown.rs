use lxc_executor::test_utils::write_script;
use lxc_executor::{ProcessExecutor, Script, ScriptRunner};
use lxc_gateway_server::events::EventBroadcaster;
use lxc_gateway_server::{create_app, shutdown_on, AppState};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;

fn post(addr: SocketAddr, path: &str) -> String {
    let mut stream = std::net::TcpStream::connect(addr).unwrap();
    write!(
        stream,
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[tokio::test]
async fn test_shutdown_terminates_in_flight_subprocesses() {
    let root = TempDir::new().unwrap();
    write_script(root.path(), Script::Restart, "sleep 30").unwrap();

    let executor = Arc::new(
        ProcessExecutor::new(root.path()).with_termination_grace(Duration::from_millis(300)),
    );
    let scripts = ScriptRunner::new(root.path(), executor.clone());
    let app = create_app(AppState::new(scripts, Arc::new(EventBroadcaster::new())));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let signal = async move {
        let _ = stop_rx.await;
    };
    let server = tokio::spawn({
        let executor = executor.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_on(signal, executor))
                .await
        }
    });

    let client = tokio::task::spawn_blocking(move || post(addr, "/api/containers/web1/restart"));

    let mut running = false;
    for _ in 0..100 {
        if !executor.active_processes().is_empty() {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(running, "restart script never started");

    let started = Instant::now();
    stop_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not drain after shutdown")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(executor.active_processes().is_empty());

    let response = client.await.unwrap();
    assert!(
        response.starts_with("HTTP/1.1 500"),
        "unexpected response: {response}"
    );
    assert!(response.contains("Failed to restart container"));
}
