use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use anyhow::{anyhow, Result};
use shared::types::DiscoveryResult;
use crate::config::CacheConfig;
use crate::discovery::Collector;

/// Commands sent to the cache task
#[derive(Debug)]
pub enum CacheCommand {
    GetServerList(oneshot::Sender<Result<DiscoveryResult>>),
    ResetLoading(oneshot::Sender<()>),
    /// A collection run completed; `reply` belongs to the caller that started it
    Finished {
        run: u64,
        result: Result<DiscoveryResult>,
        reply: oneshot::Sender<Result<DiscoveryResult>>,
    },
    Shutdown,
}

struct Loading {
    run: u64,
    since: Instant,
}

struct Cached {
    result: DiscoveryResult,
    expires_at: Instant,
}

/// The two shared slots. Only the cache task touches them, which makes the
/// "nothing cached, start a run" transition atomic.
#[derive(Default)]
struct CacheState {
    loading: Option<Loading>,
    cached: Option<Cached>,
    next_run: u64,
}

impl CacheState {
    fn fresh(&self, now: Instant) -> Option<&DiscoveryResult> {
        self.cached
            .as_ref()
            .filter(|cached| now < cached.expires_at)
            .map(|cached| &cached.result)
    }

    /// Whether a run is in flight, dropping a flag older than `timeout`
    fn is_loading(&mut self, now: Instant, timeout: Option<Duration>) -> bool {
        let Some(loading) = &self.loading else {
            return false;
        };

        match timeout {
            Some(timeout) if now.duration_since(loading.since) >= timeout => {
                tracing::warn!(
                    "Loading flag of run {} is older than {:?}, clearing it",
                    loading.run,
                    timeout
                );
                self.loading = None;
                false
            }
            _ => true,
        }
    }
}

/// Handle to the single-flight server list cache
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CacheHandle {
    /// Spawn the cache task around the given collector
    pub fn spawn(collector: Arc<dyn Collector>, config: CacheConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<CacheCommand>(256);
        let weak_tx = tx.downgrade();
        let ttl = config.ttl();
        let loading_timeout = config.loading_timeout();

        tokio::spawn(async move {
            let mut state = CacheState::default();

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    CacheCommand::GetServerList(reply) => {
                        let now = Instant::now();

                        if state.is_loading(now, loading_timeout) {
                            tracing::debug!("Server list is currently loading");
                            let _ = reply.send(Ok(DiscoveryResult::loading()));
                            continue;
                        }

                        if let Some(result) = state.fresh(now) {
                            tracing::debug!("Cached response is used");
                            let _ = reply.send(Ok(result.clone()));
                            continue;
                        }

                        let Some(run_tx) = weak_tx.upgrade() else {
                            let _ = reply.send(Err(anyhow!("Cache is shutting down")));
                            continue;
                        };

                        let run = state.next_run;
                        state.next_run += 1;
                        state.loading = Some(Loading { run, since: now });
                        tracing::info!("Start loading the server list (run {})", run);

                        spawn_run(run, collector.clone(), run_tx, reply);
                    }
                    CacheCommand::ResetLoading(reply) => {
                        if let Some(loading) = state.loading.take() {
                            tracing::info!("Loading flag of run {} reset", loading.run);
                        }
                        let _ = reply.send(());
                    }
                    CacheCommand::Finished { run, result, reply } => {
                        // a run superseded by a reset must not clear its successor's flag
                        if state.loading.as_ref().is_some_and(|loading| loading.run == run) {
                            state.loading = None;
                        }

                        match result {
                            Ok(result) => {
                                state.cached = Some(Cached {
                                    result: result.clone(),
                                    expires_at: Instant::now() + ttl,
                                });
                                let _ = reply.send(Ok(result));
                            }
                            Err(e) => {
                                tracing::error!("Failed to load the server list (run {}): {:#}", run, e);
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    CacheCommand::Shutdown => {
                        tracing::info!("Cache task shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Cached list, a loading placeholder, or the result of a fresh run
    pub async fn get_server_list(&self) -> Result<DiscoveryResult> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::GetServerList(reply)).await?;
        rx.await?
    }

    /// Clear the loading flag, keeping any cached result
    pub async fn reset_loading(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::ResetLoading(reply)).await?;
        rx.await?;
        Ok(())
    }

    /// Shutdown the cache task
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(CacheCommand::Shutdown).await?;
        Ok(())
    }
}

/// Run the collector off the cache task and report back when done.
/// A panicking collector is reported as a failed run.
fn spawn_run(
    run: u64,
    collector: Arc<dyn Collector>,
    tx: mpsc::Sender<CacheCommand>,
    reply: oneshot::Sender<Result<DiscoveryResult>>,
) {
    tokio::spawn(async move {
        let collection = tokio::spawn(async move { collector.collect().await });
        let result = match collection.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("Collection task failed: {}", e)),
        };

        if tx.send(CacheCommand::Finished { run, result, reply }).await.is_err() {
            tracing::error!("Cache task gone before run {} finished", run);
        }
    });
}
