//! Dedicated read-ahead worker.
//!
//! Navigation prepares the requested page synchronously; the next page is
//! handed to this worker so the caller never waits on it. Failures are
//! logged and swallowed — the user has not asked for that page yet, and a
//! later navigation retries from scratch.

use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use crate::config::Config;

use super::{PagePlan, PageSlot, SharedArchive, prepare_page_snapshot};

pub(crate) struct PrepareRequest {
    pub(crate) page_index: usize,
    pub(crate) plan: PagePlan,
    /// Slot epoch when `plan` was snapshotted from the album.
    pub(crate) plan_epoch: u64,
    pub(crate) slot: Arc<PageSlot>,
    pub(crate) archive: SharedArchive,
    pub(crate) config: Arc<Config>,
    pub(crate) viewport: Option<(u32, u32)>,
}

enum ReadAheadRequest {
    Prepare(PrepareRequest),
    Shutdown,
}

pub(crate) struct ReadAheadWorker {
    request_tx: UnboundedSender<ReadAheadRequest>,
    _runtime: WorkerRuntime,
    worker: Option<JoinHandle<()>>,
}

struct WorkerRuntime {
    _owned: Option<Runtime>,
    handle: Handle,
}

impl WorkerRuntime {
    fn new() -> Self {
        if let Ok(handle) = Handle::try_current() {
            return Self {
                _owned: None,
                handle,
            };
        }

        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("cvw-readahead")
            .build()
            .expect("read-ahead runtime should initialize");
        let handle = runtime.handle().clone();
        Self {
            _owned: Some(runtime),
            handle,
        }
    }

    fn spawn_blocking<F>(&self, task: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn_blocking(task)
    }
}

impl ReadAheadWorker {
    pub(crate) fn spawn() -> Self {
        let (request_tx, request_rx) = unbounded_channel();
        let runtime = WorkerRuntime::new();
        let worker = runtime.spawn_blocking(move || read_ahead_main(request_rx));

        Self {
            request_tx,
            _runtime: runtime,
            worker: Some(worker),
        }
    }

    pub(crate) fn schedule(&self, request: PrepareRequest) {
        if self
            .request_tx
            .send(ReadAheadRequest::Prepare(request))
            .is_err()
        {
            log::warn!("read-ahead worker is gone; prefetch skipped");
        }
    }
}

impl Drop for ReadAheadWorker {
    fn drop(&mut self) {
        let _ = self.request_tx.send(ReadAheadRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

fn read_ahead_main(mut request_rx: UnboundedReceiver<ReadAheadRequest>) {
    while let Some(request) = request_rx.blocking_recv() {
        match request {
            ReadAheadRequest::Prepare(request) => {
                match prepare_page_snapshot(
                    &request.slot,
                    &request.plan,
                    &request.archive,
                    &request.config,
                    request.viewport,
                    request.plan_epoch,
                ) {
                    Ok(()) => log::debug!("read-ahead prepared page {}", request.page_index),
                    Err(err) => {
                        log::warn!("read-ahead for page {} failed: {err}", request.page_index);
                    }
                }
            }
            ReadAheadRequest::Shutdown => break,
        }
    }
}
