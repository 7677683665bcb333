//! Routed execution runtime for teamlink.
//!
//! The `LinkEngine` is a synchronous executor that blocks on namespace locks
//! and store I/O. This module runs it on two bounded, thread-based worker
//! pools: lookups go to the Read pool and everything else to the Write pool,
//! so a backlog of long resolutions cannot starve lookups.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{LinkEngine, OperationContext};
use crate::error::{ExecutionError, LinkError, LinkResult};
use crate::request::{Access, Request, Response};

/// Execution path selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// Read-only operations.
    Read,
    /// Mutating operations.
    Write,
}

impl ExecutionPath {
    /// Routes a request by whether it mutates the store.
    #[must_use]
    pub const fn for_request(request: &Request) -> Self {
        match request.access() {
            Access::Read => Self::Read,
            Access::Write => Self::Write,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkRuntimeConfig {
    /// Number of Read workers.
    pub read_workers: usize,
    /// Number of Write workers.
    pub write_workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for LinkRuntimeConfig {
    fn default() -> Self {
        Self {
            read_workers: 4,
            write_workers: 2,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Execute {
        request: Request,
        ctx: OperationContext,
        reply: Sender<LinkResult<Response>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(path: ExecutionPath, workers: usize, queue_capacity: usize, engine: &LinkEngine) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = engine.clone();
            let thread_name = format!("teamlink-{}-{idx}", path.label());
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Execute {
                            request,
                            ctx,
                            reply,
                        }) => {
                            // Skip work whose caller already gave up.
                            let result = match ctx.checkpoint() {
                                Ok(()) => engine.execute(request, &ctx),
                                Err(e) => Err(LinkError::from(e)),
                            };
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .expect("failed to spawn teamlink worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    fn try_submit(&self, job: Job, path: ExecutionPath) -> Result<(), LinkError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(path = path.label(), capacity = self.queue_capacity, "worker queue full");
                Err(LinkError::Execution(ExecutionError::QueueFull {
                    path: path.label().to_string(),
                    capacity: self.queue_capacity,
                }))
            }
            Err(TrySendError::Disconnected(_)) => Err(LinkError::Execution(ExecutionError::Disconnected {
                path: path.label().to_string(),
            })),
        }
    }

    fn shutdown(self) {
        // Close the channel: workers will drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle returned by `execute_async`.
pub struct ExecutionHandle {
    path: ExecutionPath,
    ctx: OperationContext,
    rx: Receiver<LinkResult<Response>>,
}

impl ExecutionHandle {
    /// Returns the path selected by the router.
    #[must_use]
    pub const fn path(&self) -> ExecutionPath {
        self.path
    }

    /// The context the job runs with. Cancelling it stops the job at its
    /// next checkpoint.
    #[must_use]
    pub const fn context(&self) -> &OperationContext {
        &self.ctx
    }

    /// Waits for the execution to complete.
    pub fn join(self) -> LinkResult<Response> {
        let path = self.path.label().to_string();
        self.rx
            .recv()
            .map_err(|_| LinkError::Execution(ExecutionError::Disconnected { path }))?
    }

    /// Waits for the execution to complete with a timeout.
    ///
    /// On timeout the job is cancelled so it commits nothing afterwards.
    pub fn join_timeout(self, timeout: Duration) -> LinkResult<Response> {
        let path = self.path.label().to_string();
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                self.ctx.cancel();
                LinkError::Execution(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            RecvTimeoutError::Disconnected => LinkError::Execution(ExecutionError::Disconnected { path }),
        })?
    }
}

/// A routed runtime that keeps lookups isolated from mutations.
pub struct LinkRuntime {
    engine: LinkEngine,
    read: WorkerPool,
    write: WorkerPool,
}

impl LinkRuntime {
    /// Create a runtime over `engine`.
    pub fn new(engine: LinkEngine, config: LinkRuntimeConfig) -> Self {
        let read = WorkerPool::start(ExecutionPath::Read, config.read_workers, config.queue_capacity, &engine);
        let write = WorkerPool::start(ExecutionPath::Write, config.write_workers, config.queue_capacity, &engine);
        Self {
            engine,
            read,
            write,
        }
    }

    /// Queue a request on its routed path.
    ///
    /// Malformed requests are rejected here, before they take a queue slot.
    pub fn execute_async(&self, request: Request, ctx: OperationContext) -> Result<ExecutionHandle, LinkError> {
        request.validate()?;
        let path = ExecutionPath::for_request(&request);
        let (tx, rx) = bounded::<LinkResult<Response>>(1);
        let job = Job::Execute {
            request,
            ctx: ctx.clone(),
            reply: tx,
        };
        match path {
            ExecutionPath::Read => self.read.try_submit(job, path)?,
            ExecutionPath::Write => self.write.try_submit(job, path)?,
        }
        Ok(ExecutionHandle { path, ctx, rx })
    }

    /// Execute a request synchronously on its routed path.
    pub fn execute(&self, request: Request) -> LinkResult<Response> {
        self.execute_async(request, OperationContext::new())?.join()
    }

    /// Returns a shared reference to the underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &LinkEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, path: ExecutionPath, duration: Duration) -> Result<Receiver<()>, LinkError> {
        let (tx, rx) = bounded::<()>(1);
        let job = Job::Sleep { duration, reply: tx };
        match path {
            ExecutionPath::Read => self.read.try_submit(job, path)?,
            ExecutionPath::Write => self.write.try_submit(job, path)?,
        }
        Ok(rx)
    }
}

impl Drop for LinkRuntime {
    fn drop(&mut self) {
        // Deterministic shutdown: stop workers and join threads.
        let placeholder = || WorkerPool {
            tx: bounded::<Job>(1).0,
            workers: Vec::new(),
            queue_capacity: 1,
        };
        let read = std::mem::replace(&mut self.read, placeholder());
        let write = std::mem::replace(&mut self.write, placeholder());

        read.shutdown();
        write.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::game::Game;
    use crate::mapping::Seed;
    use crate::storage::{InMemoryLeagueStore, LeagueStore};

    fn runtime(read_workers: usize, write_workers: usize, queue_capacity: usize) -> LinkRuntime {
        let engine = LinkEngine::new(Arc::new(InMemoryLeagueStore::new()));
        LinkRuntime::new(
            engine,
            LinkRuntimeConfig {
                read_workers,
                write_workers,
                queue_capacity,
            },
        )
    }

    fn lookup(teams: &[&str]) -> Request {
        Request::LookupMappings {
            namespace: "ns".to_string(),
            teams: teams.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    #[test]
    fn router_routes_as_expected() {
        assert_eq!(ExecutionPath::for_request(&lookup(&[])), ExecutionPath::Read);
        let resolve = Request::ResolveSecondarySeason {
            namespace: "ns".to_string(),
            seed: Seed::new("X", "A"),
            games: vec![],
        };
        assert_eq!(ExecutionPath::for_request(&resolve), ExecutionPath::Write);
    }

    #[test]
    fn executes_requests_end_to_end() {
        let runtime = runtime(1, 1, 16);
        runtime
            .execute(Request::RegisterPrimarySeason {
                namespace: "ns".to_string(),
                games: vec![Game::new(1, "A", "B")],
            })
            .unwrap();

        let Response::Lookup { mappings } = runtime.execute(lookup(&["A"])).unwrap() else {
            panic!("expected lookup response");
        };
        assert_eq!(mappings[0].primary.as_deref(), Some("A"));
    }

    #[test]
    fn write_work_does_not_starve_reads() {
        let runtime = runtime(1, 1, 16);

        // Occupy the write worker.
        let sleep = runtime
            .submit_sleep(ExecutionPath::Write, Duration::from_millis(200))
            .unwrap();

        let started = std::time::Instant::now();
        let handle = runtime.execute_async(lookup(&["A"]), OperationContext::new()).unwrap();
        assert_eq!(handle.path(), ExecutionPath::Read);
        let _ = handle.join_timeout(Duration::from_millis(150)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        sleep.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn full_queue_is_reported() {
        let runtime = runtime(1, 1, 1);
        let busy = runtime
            .submit_sleep(ExecutionPath::Write, Duration::from_millis(200))
            .unwrap();
        // Wait until the worker has taken the sleep job off the queue.
        std::thread::sleep(Duration::from_millis(50));
        let queued = runtime
            .submit_sleep(ExecutionPath::Write, Duration::from_millis(1))
            .unwrap();

        let err = runtime
            .execute_async(
                Request::EraseNamespace {
                    namespace: "ns".to_string(),
                },
                OperationContext::new(),
            )
            .err()
            .expect("queue should be full");
        assert!(matches!(
            err,
            LinkError::Execution(ExecutionError::QueueFull { capacity: 1, .. })
        ));
        assert_eq!(err.status(), "Server busy");

        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        queued.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn cancelled_job_is_skipped() {
        let runtime = runtime(1, 1, 16);
        let sleep = runtime
            .submit_sleep(ExecutionPath::Write, Duration::from_millis(100))
            .unwrap();

        let ctx = OperationContext::new();
        let handle = runtime
            .execute_async(
                Request::RegisterPrimarySeason {
                    namespace: "ns".to_string(),
                    games: vec![Game::new(1, "A", "B")],
                },
                ctx.clone(),
            )
            .unwrap();
        ctx.cancel();

        let err = handle.join().unwrap_err();
        assert!(matches!(err, LinkError::Execution(ExecutionError::Cancelled)));
        assert!(runtime.engine().store().games("ns").unwrap().is_empty());
        sleep.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn invalid_requests_never_reach_a_worker() {
        let runtime = runtime(1, 1, 16);
        let err = runtime
            .execute_async(
                Request::EraseNamespace {
                    namespace: String::new(),
                },
                OperationContext::new(),
            )
            .err()
            .expect("empty namespace is invalid");
        assert!(err.is_validation());
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<LinkResult<Response>>(1);
        // Drop sender without sending, so recv() must see Disconnected.
        drop(tx);

        let handle = ExecutionHandle {
            path: ExecutionPath::Read,
            ctx: OperationContext::new(),
            rx,
        };

        let err = handle.join().unwrap_err();
        let LinkError::Execution(ExecutionError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "read");
    }

    #[test]
    fn join_timeout_cancels_the_job() {
        let (_tx, rx) = bounded::<LinkResult<Response>>(1);
        let handle = ExecutionHandle {
            path: ExecutionPath::Write,
            ctx: OperationContext::new(),
            rx,
        };
        let ctx = handle.context().clone();

        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, LinkError::Execution(ExecutionError::Timeout { .. })));
        assert!(ctx.is_cancelled());
    }
}
