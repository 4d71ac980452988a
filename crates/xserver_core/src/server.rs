//! Worker runtime: listener, admission-gated accept loop, maintenance tick,
//! signal handling and graceful drain.
//!
//! The OS readiness multiplexing itself is delegated to the tokio reactor;
//! this module owns what the worker layers on top of it: the connection
//! registry, batched accepts, the shutdown phases and the periodic
//! housekeeping.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use xserver_auth::CredentialStore;
use xserver_cache::FileCache;
use xserver_config::ServerConfig;
use xserver_limit::{IpLimiter, LimitSettings};

use crate::stats::WorkerStats;
use crate::worker::handle_connection;

/// Upper bound on the graceful drain.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// Stop accepting; let in-flight connections finish.
    Draining,
    /// Tear everything down now.
    Stopping,
}

struct ConnHandle {
    abort: AbortHandle,
}

pub struct Worker {
    pub(crate) cfg: Arc<ServerConfig>,
    pub(crate) limiter: Arc<IpLimiter>,
    pub(crate) cache: Arc<FileCache>,
    pub(crate) credentials: Arc<CredentialStore>,
    pub(crate) stats: Arc<WorkerStats>,
    shutdown_tx: watch::Sender<Phase>,
    registry: DashMap<u64, ConnHandle>,
    conn_seq: AtomicU64,
    /// Global connection permits; bounds the worker's fd usage.
    conn_permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(cfg: ServerConfig) -> Arc<Self> {
        let limiter = IpLimiter::new(LimitSettings {
            max_conn_per_ip: cfg.limits.max_conn_per_ip,
            rps_limit: cfg.limits.rps_limit,
            burst_limit: cfg.limits.burst_limit,
            cleanup_interval_secs: cfg.limits.cleanup_interval_secs,
        });
        let cache = FileCache::new(
            cfg.cache.max_file_bytes,
            cfg.cache.max_total_bytes,
            cfg.cache.idle_expiry_secs,
        );
        let credentials = CredentialStore::load(&cfg.credentials_file);
        let (shutdown_tx, _) = watch::channel(Phase::Running);
        let conn_permits = Arc::new(Semaphore::new(cfg.max_connections.max(1) as usize));

        Arc::new(Self {
            cfg: Arc::new(cfg),
            limiter: Arc::new(limiter),
            cache: Arc::new(cache),
            credentials: Arc::new(credentials),
            stats: Arc::new(WorkerStats::default()),
            shutdown_tx,
            registry: DashMap::new(),
            conn_seq: AtomicU64::new(1),
            conn_permits,
        })
    }

    pub fn stats_handle(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.cfg.listen_port));
        info!(target: "xserver::worker", %addr, "Binding listener");
        let listener = TcpListener::bind(addr).await?;
        self.install_signal_handlers();
        self.serve_with(listener).await
    }

    /// Serve on an already-bound listener (tests inject ephemeral ports).
    pub async fn serve_with(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            target: "xserver::worker",
            listen = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            workers = self.cfg.workers,
            max_connections = self.cfg.max_connections,
            routes = self.cfg.routes.len(),
            "Worker serving"
        );

        let _sweeper = self.cache.spawn_sweeper(self.cfg.cache.cleanup_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.cfg.tick_millis.max(100)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // The phase is re-read every iteration (the tick arm keeps the
            // loop live), so a shutdown requested before this task
            // subscribed is still observed.
            let phase = *shutdown_rx.borrow_and_update();
            match phase {
                Phase::Draining => {
                    self.drain().await;
                    break;
                }
                Phase::Stopping => {
                    self.abort_all();
                    break;
                }
                Phase::Running => {}
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tick.tick() => {
                    debug!(
                        target: "xserver::worker",
                        active = self.stats.active_connections(),
                        tracked_ips = self.limiter.tracked_ips(),
                        cache_resident = self.cache.resident_bytes(),
                        "Maintenance tick"
                    );
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, peer)) => {
                            self.admit_and_spawn(stream, peer);
                            // Drain the accept backlog in one readiness
                            // burst, bounded by the configured batch.
                            let mut batch = 1usize;
                            while batch < self.cfg.accept_batch {
                                match try_accept_now(&listener).await {
                                    Some(Ok((stream, peer))) => {
                                        self.admit_and_spawn(stream, peer);
                                        batch += 1;
                                    }
                                    Some(Err(err)) => {
                                        warn!(target: "xserver::worker", error = %err, "Accept failed mid-batch");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                        Err(err) => {
                            warn!(target: "xserver::worker", error = %err, "Accept failed");
                            // Back off briefly so fd exhaustion cannot spin
                            // the loop hot.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }

        info!(
            target: "xserver::worker",
            served = self.stats.active_connections(),
            "Worker stopped"
        );
        Ok(())
    }

    fn admit_and_spawn(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        self.stats.connection_accepted();

        let Ok(permit) = Arc::clone(&self.conn_permits).try_acquire_owned() else {
            warn!(
                target: "xserver::worker",
                client = %peer,
                limit = self.cfg.max_connections,
                "Worker connection cap reached; dropping connection"
            );
            self.stats.connection_rejected();
            drop(stream);
            return;
        };

        if let Err(err) = self.limiter.admit(peer.ip()) {
            // Close immediately with no HTTP response; a response would
            // only feed whoever is hammering us.
            debug!(target: "xserver::worker", client = %peer, error = %err, "Connection refused at admission");
            self.stats.connection_rejected();
            drop(stream);
            return;
        }

        let id = self.conn_seq.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            worker.stats.connection_opened();
            let result = handle_connection(stream, peer, &worker).await;
            if let Err(err) = result {
                if is_silent_io(&err) {
                    debug!(target: "xserver::worker", client = %peer, "Client reset mid-exchange");
                } else {
                    error!(target: "xserver::worker", client = %peer, error = ?err, "Connection handler failed");
                }
            }
            // Destruction order: admission accounting first, then the
            // registry entry, then the gauge; the socket closed when the
            // handler dropped it.
            worker.limiter.release(peer.ip());
            worker.registry.remove(&id);
            worker.stats.connection_closed();
        });

        self.registry.insert(id, ConnHandle {
            abort: handle.abort_handle(),
        });
        // The task may have finished before the insert landed.
        if handle.is_finished() {
            self.registry.remove(&id);
        }
    }

    /// SIGTERM → drain, SIGQUIT → immediate stop, SIGHUP → credential reload.
    fn install_signal_handlers(self: &Arc<Self>) {
        use tokio::signal::unix::{SignalKind, signal};

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let (Ok(mut term), Ok(mut quit), Ok(mut hup)) = (
                signal(SignalKind::terminate()),
                signal(SignalKind::quit()),
                signal(SignalKind::hangup()),
            ) else {
                error!(target: "xserver::worker", "Failed to install signal handlers");
                return;
            };

            loop {
                tokio::select! {
                    _ = term.recv() => {
                        info!(target: "xserver::worker", "SIGTERM: graceful drain");
                        worker.begin_drain();
                    }
                    _ = quit.recv() => {
                        info!(target: "xserver::worker", "SIGQUIT: immediate stop");
                        worker.begin_stop();
                    }
                    _ = hup.recv() => {
                        info!(target: "xserver::worker", "SIGHUP: reloading credentials");
                        if let Err(err) = worker.credentials.reload() {
                            warn!(target: "xserver::worker", error = %err, "Credential reload failed");
                        }
                    }
                }
            }
        });
    }

    /// Enter the draining phase. Safe to call repeatedly; later calls are
    /// no-ops, which is what makes back-to-back SIGTERMs idempotent.
    pub fn begin_drain(&self) {
        self.shutdown_tx.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Draining;
                true
            } else {
                false
            }
        });
    }

    /// Escalate to an immediate stop.
    pub fn begin_stop(&self) {
        self.shutdown_tx.send_if_modified(|phase| {
            if *phase != Phase::Stopping {
                *phase = Phase::Stopping;
                true
            } else {
                false
            }
        });
    }

    async fn drain(&self) {
        info!(
            target: "xserver::worker",
            active = self.stats.active_connections(),
            "Draining: accepts stopped"
        );
        let deadline = Instant::now() + DRAIN_DEADLINE;
        while self.stats.active_connections() > 0 && Instant::now() < deadline {
            if *self.shutdown_tx.borrow() == Phase::Stopping {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.abort_all();
    }

    fn abort_all(&self) {
        let mut aborted = 0usize;
        self.registry.retain(|_, handle| {
            handle.abort.abort();
            aborted += 1;
            false
        });
        if aborted > 0 {
            warn!(target: "xserver::worker", aborted, "Destroyed remaining connections");
        }
    }
}

fn is_silent_io(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>().is_some_and(|e| {
        matches!(
            e.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        )
    })
}

/// Accept without waiting: `None` when the backlog is empty.
async fn try_accept_now(
    listener: &TcpListener,
) -> Option<io::Result<(TcpStream, SocketAddr)>> {
    std::future::poll_fn(|cx| match listener.poll_accept(cx) {
        Poll::Ready(res) => Poll::Ready(Some(res)),
        Poll::Pending => Poll::Ready(None),
    })
    .await
}
