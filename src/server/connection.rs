// Connection handling module
// Accepts a single TCP connection and serves it with the request handler

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::AppState;
use crate::handler;
use crate::logger;

/// Accept a connection, enforcing `performance.max_connections`.
pub fn accept_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
    shutdown: watch::Receiver<bool>,
) {
    // Increment counter first, then check limit (prevents race condition)
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection rejected."
            ));
            drop(stream);
            return;
        }
    }

    logger::log_connection_accepted(&peer_addr);

    handle_connection(
        stream,
        peer_addr,
        Arc::clone(state),
        Arc::clone(conn_counter),
        shutdown,
    );
}

/// Requests in flight on one connection and when the last one finished
struct Activity {
    in_flight: Cell<usize>,
    last_seen: Cell<Instant>,
}

/// Marks a request as in flight until dropped
struct InFlight(Rc<Activity>);

impl Activity {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            in_flight: Cell::new(0),
            last_seen: Cell::new(Instant::now()),
        })
    }

    fn begin(self: &Rc<Self>) -> InFlight {
        self.in_flight.set(self.in_flight.get() + 1);
        InFlight(Rc::clone(self))
    }

    /// When the connection counts as idle, `None` while a request runs
    fn idle_deadline(&self, limit: Duration) -> Option<Instant> {
        (self.in_flight.get() == 0).then(|| self.last_seen.get() + limit)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let activity = &self.0;
        activity.in_flight.set(activity.in_flight.get().saturating_sub(1));
        activity.last_seen.set(Instant::now());
    }
}

/// Resolves once no request has run for `limit`
async fn idle_expired(activity: &Activity, limit: Duration) {
    loop {
        match activity.idle_deadline(limit) {
            Some(deadline) if deadline <= Instant::now() => return,
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => tokio::time::sleep(limit).await,
        }
    }
}

/// Serve one connection on the local task set.
///
/// `read_timeout` bounds how long a client may take to send request
/// headers and `keep_alive_timeout` how long the connection may sit idle
/// between requests. A request that is already executing is never cut off.
/// A shutdown signal lets the in-flight request finish and then closes the
/// connection instead of keeping it alive.
fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::task::spawn_local(async move {
        let io = TokioIo::new(stream);

        let performance = &state.config.performance;
        let idle_limit = (performance.keep_alive_timeout > 0)
            .then(|| Duration::from_secs(performance.keep_alive_timeout));

        let mut builder = http1::Builder::new();
        builder.keep_alive(idle_limit.is_some());
        builder.timer(TokioTimer::new());
        if performance.read_timeout > 0 {
            builder.header_read_timeout(Duration::from_secs(performance.read_timeout));
        }

        let activity = Activity::new();
        let service_activity = Rc::clone(&activity);
        let service_state = Arc::clone(&state);
        let conn = builder.serve_connection(
            io,
            service_fn(move |req| {
                let in_flight = service_activity.begin();
                let response =
                    handler::handle_request(req, Arc::clone(&service_state), peer_addr);
                async move {
                    let response = response.await;
                    drop(in_flight);
                    response
                }
            }),
        );
        tokio::pin!(conn);

        let idle = async {
            match idle_limit {
                Some(limit) => idle_expired(&activity, limit).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = idle => {
                logger::log_debug(&format!("Closing idle connection from {peer_addr}"));
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
            _ = shutdown.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(err) = result {
            logger::log_connection_error(&err);
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}
