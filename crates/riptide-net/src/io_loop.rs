//! The reactor pool: one single-threaded event loop per OS thread.
//!
//! Every accepted connection is pinned to exactly one loop for its whole
//! lifetime, which is the precondition that lets request state stay
//! lock-free: a request is only ever touched by the loop that owns its
//! connection until it is explicitly handed off.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{NetError, NetResult};

/// One reactor: an OS thread driving a single-threaded async runtime.
#[derive(Debug)]
struct IoLoop {
    handle: Handle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl IoLoop {
    /// Spawn the loop thread and wait for its runtime handle.
    fn spawn(index: usize) -> NetResult<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(format!("riptide-io-{index}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                // Park here driving the reactor until shutdown; dropping
                // the runtime afterwards cancels any remaining tasks.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                debug!(index, "reactor loop exiting");
            })
            .map_err(NetError::Reactor)?;

        let handle = handle_rx
            .recv()
            .map_err(|_| {
                NetError::Reactor(std::io::Error::other("reactor thread died during startup"))
            })?
            .map_err(NetError::Reactor)?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for IoLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fixed pool of reactor threads.
///
/// The pool is created once at startup and handed to the acceptor
/// manager; [`IoLoopPool::shutdown`] is a full-server teardown that
/// cancels everything still running on the loops.
#[derive(Debug)]
pub struct IoLoopPool {
    loops: Vec<IoLoop>,
    next: AtomicUsize,
}

impl IoLoopPool {
    /// Spawn `size` reactor threads (at least one).
    pub fn new(size: usize) -> NetResult<Self> {
        let size = size.max(1);
        let mut loops = Vec::with_capacity(size);
        for index in 0..size {
            loops.push(IoLoop::spawn(index)?);
        }
        Ok(Self {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    /// Number of reactors in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Whether the pool is empty (never true for a constructed pool).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Runtime handle of the reactor at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn handle(&self, index: usize) -> &Handle {
        &self.loops[index].handle
    }

    /// Round-robin pick of the next reactor index.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len()
    }

    /// Iterate over all reactor handles.
    pub fn handles(&self) -> impl Iterator<Item = &Handle> {
        self.loops.iter().map(|l| &l.handle)
    }

    /// Stop every reactor, cancelling tasks still running on them.
    pub fn shutdown(&mut self) {
        for io_loop in &mut self.loops {
            io_loop.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_should_spawn_requested_number_of_loops() {
        let pool = IoLoopPool::new(3).unwrap();
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_should_clamp_pool_size_to_at_least_one() {
        let pool = IoLoopPool::new(0).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_should_run_tasks_on_loop_threads() {
        let pool = IoLoopPool::new(2).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        pool.handle(0).spawn(async move {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(std::thread::current().name().map(String::from));
        });
        let thread_name = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(thread_name.as_deref(), Some("riptide-io-0"));
    }

    #[test]
    fn test_should_round_robin_across_loops() {
        let pool = IoLoopPool::new(2).unwrap();
        let picks: Vec<usize> = (0..4).map(|_| pool.next_index()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_should_shut_down_cleanly() {
        let mut pool = IoLoopPool::new(2).unwrap();
        pool.shutdown();
    }
}
