// Server loop module
// Accepts connections until shutdown, then drains the active ones

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;

use super::connection::accept_connection;
use crate::config::AppState;
use crate::logger;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serve `listener` until the shutdown channel flips (or its sender is dropped).
///
/// Must run inside a `LocalSet`; connections are spawned with `spawn_local`.
pub async fn start_server_loop(
    listener: TcpListener,
    state: Arc<AppState>,
    active_connections: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(
                            stream,
                            peer_addr,
                            &state,
                            &active_connections,
                            shutdown.clone(),
                        );
                    }
                    Err(e) => logger::log_error(&format!("Failed to accept connection: {e}")),
                }
            }

            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    let grace = Duration::from_secs(state.config.performance.shutdown_grace_period);
    drain_connections(&active_connections, grace).await;
    Ok(())
}

/// Wait for active connections to finish, at most `grace`
async fn drain_connections(active: &AtomicUsize, grace: Duration) {
    logger::log_shutdown_started(active.load(Ordering::SeqCst));

    let deadline = Instant::now() + grace;
    while active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }

    logger::log_shutdown_complete(active.load(Ordering::SeqCst));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::create_listener;
    use crate::warehouse::fake::FakeWarehouse;
    use std::future::Future;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_state(warehouse: Arc<FakeWarehouse>, tune: impl FnOnce(&mut Config)) -> Arc<AppState> {
        let mut config = Config::load_from("does-not-exist/config").unwrap();
        config.logging.access_log = false;
        config.performance.shutdown_grace_period = 1;
        tune(&mut config);
        Arc::new(AppState::new(&config, warehouse))
    }

    /// Send one request and read until the server closes the connection
    async fn send(addr: SocketAddr, method: &str, body: &str, keep_alive: bool) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let connection = if keep_alive { "keep-alive" } else { "close" };
        let request = format!(
            "{method} /api-bigquery HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {connection}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    /// Run the loop on an ephemeral port around `client`, then shut it down
    async fn serve<F, Fut>(state: Arc<AppState>, active: Arc<AtomicUsize>, client: F)
    where
        F: FnOnce(SocketAddr) -> Fut,
        Fut: Future<Output = ()>,
    {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let server =
                    tokio::task::spawn_local(start_server_loop(listener, state, active, rx));
                client(addr).await;
                tx.send(true).unwrap();
                server.await.unwrap().unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn test_serves_requests_until_shutdown() {
        let warehouse = Arc::new(FakeWarehouse::new());
        let state = test_state(Arc::clone(&warehouse), |_| {});
        let active = Arc::new(AtomicUsize::new(0));

        serve(state, Arc::clone(&active), |addr| async move {
            let created = send(addr, "POST", r#"{"dataset":"sales"}"#, false).await;
            assert!(created.starts_with("HTTP/1.1 200 OK"));
            assert!(created.ends_with(r#"{"data":"sales"}"#));

            let rejected = send(addr, "PUT", r#"{"dataset":"sales"}"#, false).await;
            assert!(rejected.starts_with("HTTP/1.1 404 Not Found"));
            assert!(rejected.contains("requires a POST or DELETE"));
        })
        .await;

        assert!(warehouse.has_dataset("sales"));
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_query_outlives_connection_timeouts() {
        let warehouse =
            Arc::new(FakeWarehouse::new().with_query_delay(Duration::from_millis(2500)));
        let state = test_state(Arc::clone(&warehouse), |config| {
            config.performance.read_timeout = 1;
            config.performance.keep_alive_timeout = 1;
        });

        serve(state, Arc::new(AtomicUsize::new(0)), |addr| async move {
            let body = r#"{"dataset":"d","runQuery":{"options":{"query":"SELECT 1"}}}"#;
            let response = send(addr, "POST", body, false).await;
            assert!(response.starts_with("HTTP/1.1 200 OK"), "got {response:?}");
            assert!(response.ends_with(r#"{"data":[]}"#));
        })
        .await;

        assert_eq!(warehouse.calls(), vec!["run_query".to_string()]);
    }

    #[tokio::test]
    async fn test_idle_keep_alive_connection_is_closed() {
        let state = test_state(Arc::new(FakeWarehouse::new()), |config| {
            config.performance.read_timeout = 10;
            config.performance.keep_alive_timeout = 1;
        });

        serve(state, Arc::new(AtomicUsize::new(0)), |addr| async move {
            let started = std::time::Instant::now();
            let response = send(addr, "POST", r#"{"dataset":"sales"}"#, true).await;
            assert!(response.starts_with("HTTP/1.1 200 OK"));
            assert!(started.elapsed() >= Duration::from_millis(900));
            assert!(started.elapsed() < Duration::from_secs(8));
        })
        .await;
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace_period() {
        let active = AtomicUsize::new(1);
        let started = std::time::Instant::now();
        drain_connections(&active, Duration::from_millis(120)).await;
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(active.load(Ordering::SeqCst), 1);
    }
}
