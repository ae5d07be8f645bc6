use crate::error::Error;
use exec::{DeviceProperties, LaunchConfig};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub type Work = BoxFuture<'static, Result<(), Error>>;

enum Command {
    Work(Work),
    Fence(crossbeam::channel::Sender<Option<Error>>),
}

/// Asynchronous in-order execution queue of one accelerator device.
///
/// Work is executed by a dedicated worker thread in enqueue order.
/// Once enqueued work fails, all following work is skipped until the error
/// is collected by [`ExecutionResource::synchronize`].
pub struct ExecutionResource {
    device: Arc<DeviceProperties>,
    tx: Option<crossbeam::channel::Sender<Command>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for ExecutionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ExecutionResource")
            .field("device", &self.device.name)
            .field("closed", &self.tx.is_none())
            .finish_non_exhaustive()
    }
}

impl ExecutionResource {
    pub fn new(device: DeviceProperties) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(Error::Spawn)?;
        let (tx, rx) = crossbeam::channel::unbounded();
        let worker = std::thread::Builder::new()
            .name(format!("{}-queue", device.name))
            .spawn(move || process_commands(&runtime, &rx))
            .map_err(Error::Spawn)?;
        Ok(Self {
            device: Arc::new(device),
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn device(&self) -> &Arc<DeviceProperties> {
        &self.device
    }

    /// Enqueue work behind all previously enqueued work.
    pub fn enqueue<F>(&self, work: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.send(Command::Work(Box::pin(work)))
    }

    /// Enqueue a kernel launch on this resource's device.
    ///
    /// The launch configuration is validated before enqueuing.
    pub fn launch<K>(&self, config: LaunchConfig, kernel: K) -> Result<(), Error>
    where
        K: exec::Kernel + Send + Sync + 'static,
        K::Error: Send,
    {
        exec::launch::validate(&self.device, &config)?;
        let device = Arc::clone(&self.device);
        self.enqueue(async move {
            match exec::launch(&device, config, &kernel).await {
                Ok(_) => Ok(()),
                Err(exec::Error::Launch(err)) => Err(Error::Launch(err)),
                Err(exec::Error::Kernel(err)) => Err(Error::Kernel(err.to_string())),
            }
        })
    }

    /// Block until all enqueued work completed.
    ///
    /// Returns the first error raised by enqueued work since the last
    /// synchronization.
    pub fn synchronize(&self) -> Result<(), Error> {
        let (fence_tx, fence_rx) = crossbeam::channel::bounded(1);
        self.send(Command::Fence(fence_tx))?;
        match fence_rx.recv() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(Error::ResourceClosed),
        }
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        let tx = self.tx.as_ref().ok_or(Error::ResourceClosed)?;
        tx.send(command).map_err(|_| Error::ResourceClosed)
    }
}

fn process_commands(
    runtime: &tokio::runtime::Runtime,
    rx: &crossbeam::channel::Receiver<Command>,
) {
    let mut failed: Option<Error> = None;
    for command in rx {
        match command {
            Command::Work(work) if failed.is_some() => {
                log::trace!("skipping work after earlier failure");
                drop(work);
            }
            Command::Work(work) => {
                if let Err(err) = runtime.block_on(work) {
                    log::debug!("enqueued work failed: {err}");
                    failed = Some(err);
                }
            }
            Command::Fence(reply) => {
                let _ = reply.send(failed.take());
            }
        }
    }
    if let Some(err) = failed {
        log::warn!("unsynchronized error on closed execution resource: {err}");
    }
}

impl Drop for ExecutionResource {
    fn drop(&mut self) {
        // closing the channel lets the worker drain the queue and exit
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("execution resource worker of {} panicked", self.device.name);
            }
        }
    }
}
