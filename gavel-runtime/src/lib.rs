use anyhow::Result;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct GavelHandle {
    inner: Handle,
    cancel: CancellationToken,
}

/// Tokio runtime plus the root cancellation token for a scraper process.
///
/// Every run gets a child of the root token; cancelling the root (Ctrl-C or
/// [`GavelRuntime::shutdown`]) stops pagination at the next page boundary.
pub struct GavelRuntime {
    runtime: Runtime,
    cancel: CancellationToken,
}

impl GavelRuntime {
    /// Build a multi-threaded Tokio runtime.
    ///
    /// ```
    /// use gavel_runtime::GavelRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = GavelRuntime::build("doctest-runtime", Some(1))
    ///     .expect("runtime builds");
    /// let value = runtime.block_on(async { 2 + 2 });
    /// assert_eq!(value, 4);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);

        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }

        let runtime = builder.build()?;
        Ok(Self {
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    /// Cloneable handle for spawning tasks and sharing cancellation.
    ///
    /// ```
    /// use gavel_runtime::GavelRuntime;
    ///
    /// let runtime = GavelRuntime::build("handle-example", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// assert!(!handle.cancellation().is_cancelled());
    /// ```
    pub fn handle(&self) -> GavelHandle {
        GavelHandle {
            inner: self.runtime.handle().clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel outstanding work and shut the runtime down.
    ///
    /// ```
    /// use gavel_runtime::GavelRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = GavelRuntime::build("shutdown-example", Some(1)).unwrap();
    /// let run_token = runtime.handle().run_token();
    /// runtime.shutdown(Duration::from_millis(5));
    /// assert!(run_token.is_cancelled());
    /// ```
    pub fn shutdown(self, graceful: Duration) {
        self.cancel.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl GavelHandle {
    /// Spawn a future onto the shared runtime.
    ///
    /// ```
    /// use gavel_runtime::GavelRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = GavelRuntime::build("handle-doctest", Some(1)).unwrap();
    /// let task = runtime.handle().spawn(async { 21 * 2 });
    /// let result = runtime.block_on(async move { task.await.unwrap() });
    /// assert_eq!(result, 42);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    /// The root token. Cancelling it stops every run.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token for a single run; cancelled with the root but not the reverse.
    ///
    /// ```
    /// use gavel_runtime::GavelRuntime;
    ///
    /// let runtime = GavelRuntime::build("run-token", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// let run = handle.run_token();
    /// run.cancel();
    /// assert!(!handle.cancellation().is_cancelled());
    /// ```
    pub fn run_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Cancel the root token on the first Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        self.inner.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        info!(target: "gavel.run", "interrupt received; finishing current page");
                        cancel.cancel();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_watcher_exits_on_shutdown() {
        let runtime = GavelRuntime::build("ctrl-c-test", Some(1)).unwrap();
        let handle = runtime.handle();
        let watcher = handle.cancel_on_ctrl_c();
        handle.cancellation().cancel();
        runtime.block_on(async move { watcher.await.unwrap() });
        runtime.shutdown(Duration::from_millis(10));
    }
}
