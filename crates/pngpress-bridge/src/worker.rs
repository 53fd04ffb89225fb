//! A dedicated thread hosting one execution context.
//!
//! Requests arrive over an unbounded `crossbeam-channel` queue and are handled
//! in order, so compressions on the worker never overlap. Each request
//! carries its own single-slot reply channel; the caller holds the other end
//! as a [`Ticket`] and may wait on it or drop it.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use pngpress_core::CompressionConfig;
use tracing::{debug, trace, warn};

use crate::context::{ExecutionContext, LoadRequest};
use crate::error::{BridgeError, BridgeResult, EngineLoadError};

enum Message {
    Load {
        request: LoadRequest,
        reply: Sender<BridgeResult<()>>,
    },
    Compress {
        input: Vec<u8>,
        config: CompressionConfig,
        reply: Sender<BridgeResult<Vec<u8>>>,
    },
    Shutdown,
}

/// The pending result of one request.
#[derive(Debug)]
pub struct Ticket<T> {
    rx: Receiver<BridgeResult<T>>,
}

impl<T> Ticket<T> {
    /// Block until the worker answers.
    ///
    /// # Errors
    ///
    /// The request's own error, or `Disconnected` if the worker shut down
    /// before answering.
    pub fn wait(self) -> BridgeResult<T> {
        self.rx.recv().unwrap_or(Err(BridgeError::Disconnected))
    }

    /// The answer, if it has arrived.
    pub fn try_wait(&self) -> Option<BridgeResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::Disconnected)),
        }
    }
}

#[derive(Debug)]
pub struct Worker {
    tx: Sender<Message>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// `Spawn` if the OS refuses the thread.
    pub fn spawn() -> BridgeResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("pngpress-worker".to_string())
            .spawn(move || run(&rx))
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Instantiate the engine on the worker's context.
    ///
    /// Only the first load does any work; later loads report the outcome of
    /// the first and their module and memory are ignored.
    pub fn load(&self, request: LoadRequest) -> Ticket<()> {
        self.submit(|reply| Message::Load { request, reply })
    }

    /// Queue a compression. Fails with `NotLoaded` if no load came first.
    pub fn compress(&self, input: Vec<u8>, config: CompressionConfig) -> Ticket<Vec<u8>> {
        self.submit(|reply| Message::Compress { input, config, reply })
    }

    fn submit<T>(&self, message: impl FnOnce(Sender<BridgeResult<T>>) -> Message) -> Ticket<T> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        if self.tx.send(message(reply)).is_err() {
            // The message, and its reply sender, are dropped with the error;
            // the ticket then reports Disconnected.
            trace!("worker gone, request dropped");
        }
        Ticket { rx }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _res = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("pngpress worker thread panicked");
            }
        }
    }
}

/// The worker loop.
fn run(rx: &Receiver<Message>) {
    let mut context: Option<ExecutionContext> = None;

    while let Ok(message) = rx.recv() {
        match message {
            Message::Load { request, reply } => {
                if context.is_some() {
                    debug!("repeat load request; reusing existing context");
                }
                let ctx = context.get_or_insert_with(|| ExecutionContext::new(request));
                respond(&reply, ctx.environment().map(|_| ()).map_err(BridgeError::from));
            }
            Message::Compress { input, config, reply } => {
                let result = match &context {
                    Some(ctx) => ctx.compress(&input, &config),
                    None => Err(EngineLoadError::NotLoaded.into()),
                };
                respond(&reply, result);
            }
            Message::Shutdown => break,
        }
    }
    debug!("pngpress worker stopped");
}

fn respond<T>(reply: &Sender<T>, result: T) {
    if reply.send(result).is_err() {
        trace!("caller abandoned request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{engine_module, tiny_png};
    use crate::memory::SharedMemory;

    fn request(module: Vec<u8>) -> LoadRequest {
        LoadRequest::new(module, SharedMemory::new(0, 1024, true).unwrap())
    }

    #[test]
    fn test_load_then_compress() {
        let worker = Worker::spawn().unwrap();
        worker.load(request(engine_module())).wait().unwrap();
        let out = worker.compress(tiny_png(), CompressionConfig::default()).wait().unwrap();
        assert_eq!(&out[..4], b"\x89PNG");
    }

    #[test]
    fn test_compress_before_load() {
        let worker = Worker::spawn().unwrap();
        assert_eq!(
            worker.compress(tiny_png(), CompressionConfig::default()).wait(),
            Err(BridgeError::Load(EngineLoadError::NotLoaded))
        );
    }

    #[test]
    fn test_failed_load_is_reported_to_later_requests() {
        let worker = Worker::spawn().unwrap();
        let err = worker.load(request(b"nope".to_vec())).wait().unwrap_err();
        assert!(matches!(err, BridgeError::Load(EngineLoadError::InvalidModule(_))));

        // A second load with a good module does not retry.
        assert_eq!(worker.load(request(engine_module())).wait(), Err(err.clone()));
        assert_eq!(
            worker.compress(tiny_png(), CompressionConfig::default()).wait(),
            Err(err)
        );
    }

    #[test]
    fn test_abandoned_ticket_does_not_stall_worker() {
        let worker = Worker::spawn().unwrap();
        let load = worker.load(request(engine_module()));
        drop(worker.compress(tiny_png(), CompressionConfig::default()));
        let out = worker.compress(tiny_png(), CompressionConfig::default()).wait();
        assert!(out.is_ok());
        assert_eq!(load.try_wait(), Some(Ok(())));
    }

    #[test]
    fn test_requests_after_shutdown_disconnect() {
        let worker = Worker::spawn().unwrap();
        worker.tx.send(Message::Shutdown).unwrap();
        let ticket = worker.compress(tiny_png(), CompressionConfig::default());
        assert_eq!(ticket.wait(), Err(BridgeError::Disconnected));
    }

    #[test]
    fn test_shared_worker_serves_many_threads() {
        let worker = Worker::spawn().unwrap();
        worker.load(request(engine_module())).wait().unwrap();
        thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| worker.compress(tiny_png(), CompressionConfig::default()).wait()))
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap().is_ok());
            }
        });
    }
}
