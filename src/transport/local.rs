//! In-process channel pair for development and testing.
//!
//! [`LocalChannel::pair`] returns two cross-wired endpoints: bytes sent on
//! one arrive at the other. The pair speaks the real wire format - every
//! packet is encoded and framed onto the byte stream and reassembled by the
//! receiving side's parser - so two routers joined this way exercise the
//! full codec path, not an object-passing shortcut.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::debug;

use crate::core::packet::Packet;
use crate::core::parser::Parser;
use crate::error::{MeshError, Result};
use crate::transport::{Channel, ChannelEvent, ChannelId, CloseCallbacks, CloseFn, EventSender};

/// One endpoint of an in-process duplex byte pipe.
pub struct LocalChannel {
    id: ChannelId,
    /// Sender into the peer's inbound stream. Dropped on close, which ends
    /// the peer's reader and triggers its close sequence.
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    /// Inbound stream, consumed by the reader task once `listen` is called.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    /// Chunks received but not yet parsed; drained by `recv_ready`.
    pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
    parser: Mutex<Parser>,
    shutdown: Arc<Notify>,
    close_callbacks: Arc<CloseCallbacks>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalChannel {
    /// Create two cross-wired endpoints.
    pub fn pair() -> (Arc<LocalChannel>, Arc<LocalChannel>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Arc::new(LocalChannel::new(a_tx, a_rx)),
            Arc::new(LocalChannel::new(b_tx, b_rx)),
        )
    }

    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> LocalChannel {
        LocalChannel {
            id: ChannelId::next(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            parser: Mutex::new(Parser::new()),
            shutdown: Arc::new(Notify::new()),
            close_callbacks: Arc::new(CloseCallbacks::new()),
        }
    }

    /// Frames dropped by this channel's parser so far.
    pub fn frames_dropped(&self) -> u64 {
        relock(&self.parser).frames_dropped()
    }
}

impl Channel for LocalChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn listen(&self, bus: EventSender) -> Result<()> {
        let mut rx = relock(&self.rx)
            .take()
            .ok_or_else(|| MeshError::TransportError("channel is already listening".into()))?;

        let id = self.id;
        let pending = self.pending.clone();
        let shutdown = self.shutdown.clone();
        let close_callbacks = self.close_callbacks.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    chunk = rx.recv() => match chunk {
                        Some(bytes) => {
                            relock(&pending).push_back(bytes);
                            if bus.send(ChannelEvent::Readable(id)).await.is_err() {
                                // router is gone; nothing left to signal
                                break;
                            }
                        }
                        // peer closed its end of the pipe
                        None => break,
                    },
                }
            }
            debug!(channel = %id, "local channel reader stopped");
            let _ = bus.send(ChannelEvent::Closed(id)).await;
            close_callbacks.fire(id);
        });
        Ok(())
    }

    fn recv_ready(&self, on_packet: &mut dyn FnMut(Packet)) {
        let mut parser = relock(&self.parser);
        loop {
            let chunk = relock(&self.pending).pop_front();
            match chunk {
                Some(bytes) => parser.read_bytes(&bytes, on_packet),
                None => break,
            }
        }
    }

    fn send(&self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_frame_bytes()?;
        let guard = relock(&self.tx);
        match guard.as_ref() {
            Some(tx) => tx.send(bytes).map_err(|_| MeshError::ChannelClosed),
            None => Err(MeshError::ChannelClosed),
        }
    }

    fn close(&self) {
        relock(&self.tx).take();
        self.shutdown.notify_one();
        self.close_callbacks.fire(self.id);
    }

    fn on_close(&self, callback: CloseFn) {
        self.close_callbacks.register(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn drain(channel: &LocalChannel) -> Vec<Packet> {
        let mut out = Vec::new();
        channel.recv_ready(&mut |p| out.push(p));
        out
    }

    #[tokio::test]
    async fn packets_cross_the_pair() {
        let (a, b) = LocalChannel::pair();
        let (bus_tx, mut bus_rx) = mpsc::channel(8);
        b.listen(bus_tx).unwrap();

        let packet = Packet {
            dest_addr: "b-node".into(),
            data: vec![0xC0, 0xDB, 0x01],
            ..Default::default()
        };
        a.send(&packet).unwrap();

        match bus_rx.recv().await {
            Some(ChannelEvent::Readable(id)) => assert_eq!(id, b.id()),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(drain(&b), vec![packet]);
    }

    #[tokio::test]
    async fn close_fires_callbacks_and_fails_sends() {
        let (a, _b) = LocalChannel::pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        a.on_close(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        a.close();
        a.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(
            a.send(&Packet::new()),
            Err(MeshError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn peer_close_ends_listener() {
        let (a, b) = LocalChannel::pair();
        let (bus_tx, mut bus_rx) = mpsc::channel(8);
        b.listen(bus_tx).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        b.on_close(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        a.close();
        let event = tokio::time::timeout(Duration::from_secs(1), bus_rx.recv())
            .await
            .expect("listener should observe peer close");
        assert!(matches!(event, Some(ChannelEvent::Closed(_))));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listen_twice_is_rejected() {
        let (a, _b) = LocalChannel::pair();
        let (bus_tx, _bus_rx) = mpsc::channel(8);
        a.listen(bus_tx.clone()).unwrap();
        assert!(a.listen(bus_tx).is_err());
    }
}
