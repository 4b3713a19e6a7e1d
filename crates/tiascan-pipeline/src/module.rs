//! Minimal actor primitive for pipeline components
//!
//! Components declare named, typed, bounded inputs and outputs at
//! construction time and run as a single background task. Pushing to a
//! full output blocks the producer; a closed channel is a shutdown signal,
//! not an error to retry. `spawn` starts the component's loop under a
//! cancellable shutdown token and `close` signals cancellation and waits
//! for the loop to exit, so no task outlives its handle.

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
    },
    tracing::{debug, error},
};

/// Cancellation token shared with every blocking point of a component.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled (or the handle is dropped).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Producer end of a named bounded channel.
pub struct Output<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> Output<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Blocks while the queue is full. Returns `Err` only when the
    /// consumer is gone, which callers treat as shutdown.
    pub async fn push(&self, item: T) -> Result<(), ChannelClosed> {
        self.tx.send(item).await.map_err(|_| ChannelClosed(self.name))
    }
}

/// Consumer end of a named bounded channel. Exactly one reader loop owns it.
pub struct Input<T> {
    name: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> Input<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `None` means every producer is gone: shut down, don't retry.
    pub async fn pop(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Closes the underlying queue; producers see [`ChannelClosed`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("channel '{0}' closed")]
pub struct ChannelClosed(pub &'static str);

/// Creates a named bounded channel pair.
pub fn connect<T>(name: &'static str, capacity: usize) -> (Output<T>, Input<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Output { name, tx }, Input { name, rx })
}

/// A pipeline component: one logical thread of control with typed channels.
#[async_trait]
pub trait Module: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run(mut self, shutdown: Shutdown) -> Result<()>
    where
        Self: Sized;
}

pub struct ModuleHandle {
    name: &'static str,
    shutdown: ShutdownHandle,
    handle: JoinHandle<()>,
}

/// Spawns the component's loop; errors escaping `run` are logged, not
/// swallowed silently.
pub fn spawn<M: Module>(module: M) -> ModuleHandle {
    let name = module.name();
    let (shutdown_handle, shutdown) = shutdown_channel();
    let handle = tokio::spawn(async move {
        match module.run(shutdown).await {
            Ok(()) => debug!("module {} exited", name),
            Err(e) => error!("module {} failed: {:#}", name, e),
        }
    });

    ModuleHandle {
        name,
        shutdown: shutdown_handle,
        handle,
    }
}

impl ModuleHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals cancellation and blocks until the component's loop has
    /// exited.
    pub async fn close(self) {
        self.shutdown.trigger();
        let _ = self.handle.await;
    }
}
