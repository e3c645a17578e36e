//! Shared scaffolding for integration tests: a scripted broker end speaking
//! the crate's own codec over an in-memory duplex stream, and a connector
//! that hands out pre-arranged streams for reconnect tests.
#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use osmium_stomp::{BoxedTransport, Connector, Frame, StompCodec, StompItem};

pub type BrokerEnd = Framed<DuplexStream, StompCodec>;

pub fn broker_end(stream: DuplexStream) -> BrokerEnd {
    Framed::new(stream, StompCodec::new())
}

/// Read items until a frame arrives, skipping heartbeats.
pub async fn next_frame(broker: &mut BrokerEnd) -> Frame {
    loop {
        match broker.next().await {
            Some(Ok(StompItem::Frame(frame))) => return frame,
            Some(Ok(StompItem::Heartbeat)) => continue,
            other => panic!("broker end expected a frame, saw {:?}", other),
        }
    }
}

pub async fn send_frame(broker: &mut BrokerEnd, frame: Frame) {
    broker
        .send(StompItem::Frame(frame))
        .await
        .expect("broker send");
}

pub async fn send_heartbeat(broker: &mut BrokerEnd) {
    broker
        .send(StompItem::Heartbeat)
        .await
        .expect("broker heartbeat");
}

/// Accept the CONNECT handshake, answering CONNECTED with the given
/// `heart-beat` header value. Returns the client's CONNECT frame.
pub async fn accept_connect(broker: &mut BrokerEnd, heart_beat: &str) -> Frame {
    let connect = next_frame(broker).await;
    assert_eq!(connect.command, "CONNECT");
    let connected = Frame::new("CONNECTED")
        .header("version", "1.2")
        .header("heart-beat", heart_beat);
    send_frame(broker, connected).await;
    connect
}

/// Hands out pre-arranged duplex streams, one per connect call, then
/// refuses. Lets reconnect tests script each link generation.
pub struct QueueConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl QueueConnector {
    pub fn new(streams: impl IntoIterator<Item = DuplexStream>) -> Self {
        Self {
            streams: Mutex::new(streams.into_iter().collect()),
        }
    }
}

impl Connector for QueueConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedTransport>> {
        Box::pin(async move {
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .map(|stream| Box::new(stream) as BoxedTransport)
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::ConnectionRefused, "no more scripted streams")
                })
        })
    }
}
