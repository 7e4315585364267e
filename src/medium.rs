//! The shared radio channel.
//!
//! Every frame received from an attached port is repeated to all the other
//! attached ports. Nothing is acknowledged and a client that falls behind
//! loses the oldest frames.

use std::sync::atomic::{AtomicU32, Ordering};

use async_broadcast::{broadcast, InactiveReceiver, Receiver, RecvError, Sender};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
};
use tokio_util::codec::Framed;
use tracing::Instrument;

use crate::{
    config::{framed, PortStream},
    protocol::codec::RadioCodec,
};

pub type ClientId = u32;

/// Frames buffered per client before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// Buffer size of in-process pipes.
const PIPE_CAPACITY: usize = 4096;

pub struct RadioMedium {
    frames_send: Sender<(ClientId, Bytes)>,
    frames_recv: InactiveReceiver<(ClientId, Bytes)>,

    next_client_id: AtomicU32,
}

impl Default for RadioMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioMedium {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (mut frames_send, frames_recv) = broadcast(capacity);

        // lossy like the air: never block a sender on a slow listener
        frames_send.set_overflow(true);
        frames_send.set_await_active(false);

        Self {
            frames_send,
            frames_recv: frames_recv.deactivate(),
            next_client_id: AtomicU32::new(1),
        }
    }

    /// Attach a byte stream speaking the air framing (a TCP socket, a serial
    /// port, one end of a pipe). Runs until the stream closes.
    pub fn attach<T>(&self, io: T) -> ClientId
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.next_client_id.fetch_add(1, Ordering::SeqCst);

        let frames_send = self.frames_send.clone();
        let frames_recv = self.frames_recv.activate_cloned();

        tokio::spawn(
            relay(id, Framed::new(io, RadioCodec::new()), frames_send, frames_recv)
                .instrument(tracing::info_span!("client", id)),
        );

        id
    }

    /// Connect an in-process port.
    pub fn connect(&self) -> (ClientId, Box<dyn PortStream>) {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        let id = self.attach(ours);

        (id, framed(theirs))
    }
}

async fn relay<T>(
    id: ClientId,
    port: Framed<T, RadioCodec>,
    frames_send: Sender<(ClientId, Bytes)>,
    mut frames_recv: Receiver<(ClientId, Bytes)>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = port.split();

    tracing::debug!("attached");

    loop {
        select! {
            frame = stream.next() => match frame {
                Some(Ok(frame)) => {
                    tracing::trace!(len = frame.len(), "frame on air");
                    if let Err(err) = frames_send.broadcast((id, frame)).await {
                        tracing::trace!("nobody listening: {err}");
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!("read failed: {err}");
                    break;
                }
                None => break,
            },
            msg = frames_recv.recv() => match msg {
                Ok((from, _)) if from == id => {}
                Ok((_, frame)) => {
                    if let Err(err) = sink.send(frame).await {
                        tracing::warn!("write failed: {err}");
                        break;
                    }
                }
                Err(RecvError::Overflowed(missed)) => {
                    tracing::warn!(missed, "client fell behind, frames lost");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!("detached");
}

#[cfg(test)]
mod tests {
    use tokio::time::{timeout, Duration};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn frames_reach_everyone_but_the_sender() {
        let medium = RadioMedium::new();

        let (a, mut port_a) = medium.connect();
        let (b, mut port_b) = medium.connect();
        let (_, mut port_c) = medium.connect();
        assert_ne!(a, b);

        port_a.send(Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(port_b.next().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(port_c.next().await.unwrap().unwrap(), Bytes::from_static(b"hello"));

        let echo = timeout(Duration::from_secs(1), port_a.next()).await;
        assert!(echo.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn detached_client_doesnt_stop_others() {
        let medium = RadioMedium::new();

        let (_, port_a) = medium.connect();
        let (_, mut port_b) = medium.connect();
        let (_, mut port_c) = medium.connect();

        drop(port_a);

        port_b.send(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        assert_eq!(&port_c.next().await.unwrap().unwrap()[..], &[1, 2, 3]);
    }
}
