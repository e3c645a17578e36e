use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::frame::Message;
use crate::options::Opt;

/// How many undelivered messages a subscription buffers before the read
/// worker starts blocking on it.
pub const SINK_CAPACITY: usize = 10;

/// Subscription acknowledgement modes as defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker assumes receipt as soon as it sends the message.
    Auto,
    /// Cumulative acknowledgement: ACKing a message acknowledges everything
    /// delivered before it on the same subscription.
    Client,
    /// Every message is acknowledged individually.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Registry-side state for one subscription: the sink the read worker
/// dispatches into plus everything needed to replay the SUBSCRIBE frame
/// after a reconnect.
pub(crate) struct SubscriptionEntry {
    pub(crate) destination: String,
    pub(crate) sender: mpsc::Sender<Message>,
    pub(crate) options: Vec<Opt>,
}

/// The registry maps the generated subscription id to its entry. An id is
/// present iff its sink is open; clearing the map on terminal close drops
/// the senders and thereby closes every sink exactly once.
pub(crate) type Registry = HashMap<String, SubscriptionEntry>;

/// An application-facing handle for a registered subscription.
///
/// Incoming MESSAGE frames for this subscription arrive on the handle's
/// bounded receiver, either through [`Subscription::recv`] or through the
/// [`futures::Stream`] implementation. The registry owns the sending side;
/// once the subscription is removed (unsubscribe or terminal close) the
/// stream yields the buffered remainder and then ends.
pub struct Subscription {
    id: String,
    destination: String,
    receiver: mpsc::Receiver<Message>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        destination: String,
        receiver: mpsc::Receiver<Message>,
    ) -> Self {
        Self {
            id,
            destination,
            receiver,
        }
    }

    /// The generated subscription id, stable across reconnects.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Receive the next message, or `None` once the subscription is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Consume the handle and return the underlying receiver so the caller
    /// can drive message handling directly.
    pub fn into_receiver(self) -> mpsc::Receiver<Message> {
        self.receiver
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}
