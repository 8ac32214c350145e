use std::{net::SocketAddr, sync::Arc};

use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc::{Receiver, Sender, channel, error::TrySendError};

/// Routes fan-out frames into per-connection outbound queues.
///
/// Each connection registers a bounded queue keyed by its socket address;
/// any task may push towards any connection without touching the session
/// registry. A queue that fills up marks its consumer as too slow and the
/// connection is deregistered, which ends its sender task and lets the
/// normal reset cleanup run.
#[derive(Clone)]
pub struct Exchanger {
    sockets: Arc<RwLock<AHashMap<SocketAddr, Sender<Bytes>>>>,
    capacity: usize,
}

impl Exchanger {
    pub fn new(capacity: usize) -> Self {
        Self {
            sockets: Arc::new(RwLock::new(AHashMap::with_capacity(1024))),
            capacity,
        }
    }

    /// Register a connection and get the receiving end of its queue.
    pub fn get_receiver(&self, socket: SocketAddr) -> Receiver<Bytes> {
        let (sender, receiver) = channel(self.capacity);
        self.sockets.write().insert(socket, sender);
        receiver
    }

    /// Queue bytes towards a connection.
    ///
    /// Delivery is best-effort: an unknown socket drops the bytes, a full
    /// or closed queue deregisters the connection.
    pub fn send(&self, socket: &SocketAddr, bytes: Bytes) {
        let mut teardown = false;

        {
            if let Some(sender) = self.sockets.read().get(socket) {
                match sender.try_send(bytes) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::warn!("slow consumer, tearing down: socket={socket}");
                        teardown = true;
                    }
                    Err(TrySendError::Closed(_)) => {
                        teardown = true;
                    }
                }
            }
        }

        if teardown {
            self.remove(socket);
        }
    }

    /// Deregister a connection; dropping the sender closes its queue.
    pub fn remove(&self, socket: &SocketAddr) {
        drop(self.sockets.write().remove(socket))
    }

    /// Close every queue. Connection tasks drain what was already queued
    /// and then exit.
    pub fn clear(&self) {
        self.sockets.write().clear()
    }

    pub fn len(&self) -> usize {
        self.sockets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.read().is_empty()
    }
}
