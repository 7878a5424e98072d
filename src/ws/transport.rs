//! Channel-backed [`Transport`] for WebSocket connections
//!
//! The room pushes frames into a bounded queue; a writer task owns the
//! socket sink and forwards them. The queue capacity is the backpressure
//! watermark: a client that falls that far behind is disconnected.

use axum::extract::ws::{CloseFrame, Message};
use bytes::Bytes;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::game::transport::{close_code, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub payload: Bytes,
    pub is_binary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

/// Receiving half consumed by [`run_writer`]
pub struct OutboundReceiver {
    pub frames: mpsc::Receiver<OutboundFrame>,
    pub close: watch::Receiver<Option<CloseRequest>>,
}

pub struct ChannelTransport {
    tx: mpsc::Sender<OutboundFrame>,
    close_tx: watch::Sender<Option<CloseRequest>>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new(watermark: usize) -> (Arc<Self>, OutboundReceiver) {
        let (tx, frames) = mpsc::channel(watermark.max(1));
        let (close_tx, close) = watch::channel(None);
        let transport = Arc::new(Self {
            tx,
            close_tx,
            closed: AtomicBool::new(false),
        });
        (transport, OutboundReceiver { frames, close })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Watch for a close request (used by the connection reader)
    pub fn close_requests(&self) -> watch::Receiver<Option<CloseRequest>> {
        self.close_tx.subscribe()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Bytes, is_binary: bool) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(OutboundFrame {
            payload: frame,
            is_binary,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.close(close_code::TRY_AGAIN_LATER, "backpressure");
                Err(TransportError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::Closed)
            }
        }
    }

    fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(Some(CloseRequest {
            code,
            reason: reason.to_string(),
        }));
    }
}

fn to_message(frame: OutboundFrame) -> Message {
    if frame.is_binary {
        Message::Binary(frame.payload.to_vec())
    } else {
        Message::Text(String::from_utf8_lossy(&frame.payload).into_owned())
    }
}

/// Forward queued frames to `sink` until the transport is closed or dropped.
/// Frames queued before a close request are always written before the close
/// frame.
pub async fn run_writer<S>(mut sink: S, mut outbound: OutboundReceiver)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            frame = outbound.frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(to_message(frame)).await {
                        debug!(error = %e, "websocket send failed");
                        return;
                    }
                }
                None => break,
            },
            _ = outbound.close.changed() => break,
        }
    }

    while let Ok(frame) = outbound.frames.try_recv() {
        if let Err(e) = sink.send(to_message(frame)).await {
            debug!(error = %e, "websocket send failed while draining");
            return;
        }
    }

    let request = outbound.close.borrow().clone();
    if let Some(CloseRequest { code, reason }) = request {
        if code == close_code::TRY_AGAIN_LATER {
            warn!(code, "closing slow websocket consumer");
        }
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "websocket close failed");
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_backpressure_closes() {
        let (transport, outbound) = ChannelTransport::new(2);
        assert!(transport.send(Bytes::from_static(b"a"), true).is_ok());
        assert!(transport.send(Bytes::from_static(b"b"), true).is_ok());
        assert_eq!(
            transport.send(Bytes::from_static(b"c"), true),
            Err(TransportError::Backpressure)
        );
        assert!(transport.is_closed());
        assert_eq!(
            *outbound.close.borrow(),
            Some(CloseRequest {
                code: close_code::TRY_AGAIN_LATER,
                reason: "backpressure".into()
            })
        );
        assert_eq!(
            transport.send(Bytes::from_static(b"d"), true),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let (transport, outbound) = ChannelTransport::new(4);
        transport.close(1001, "room-closed");
        transport.close(1000, "later");
        assert_eq!(outbound.close.borrow().as_ref().map(|c| c.code), Some(1001));
    }

    #[tokio::test]
    async fn test_writer_drains_before_close() {
        let (transport, outbound) = ChannelTransport::new(8);
        let (sink, mut received) = futures::channel::mpsc::unbounded::<Message>();

        transport.send(Bytes::from_static(&[3, 1, b'x']), true).unwrap();
        transport.close(1008, "Room not found");
        run_writer(sink, outbound).await;

        match received.next().await {
            Some(Message::Binary(data)) => assert_eq!(data, vec![3, 1, b'x']),
            other => panic!("expected binary frame, got {other:?}"),
        }
        match received.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1008);
                assert_eq!(frame.reason, "Room not found");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_writer_stops_when_transport_dropped() {
        let (transport, outbound) = ChannelTransport::new(8);
        let (sink, mut received) = futures::channel::mpsc::unbounded::<Message>();
        transport.send(Bytes::from_static(b"hi"), false).unwrap();
        drop(transport);
        tokio_test::block_on(async {
            run_writer(sink, outbound).await;
            assert!(matches!(received.next().await, Some(Message::Text(t)) if t == "hi"));
            assert!(received.next().await.is_none());
        });
    }
}
