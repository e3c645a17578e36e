use futures::stream::{SplitSink, SplitStream};
use futures::{future, SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::{StompCodec, StompItem};
use crate::error::{exponential_backoff, RetryPolicy, StompError};
use crate::frame::{BrokerError, Connected, Frame, Message};
use crate::options::Opt;
use crate::subscription::{AckMode, Registry, Subscription, SubscriptionEntry, SINK_CAPACITY};
use crate::transport::{BoxedTransport, Connector, TcpConnector, Transport};

/// Headers sent in CONNECT unless an option overrides them.
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_HEARTBEAT: &str = "0,1000";

/// How long the read worker blocks on a full subscription sink before the
/// consumer counts as fatally slow, when heart-beats leave no interval to
/// derive the grace from.
const SLOW_CONSUMER_GRACE: Duration = Duration::from_secs(30);

/// The write queue is a rendezvous point, not a buffer: callers park until
/// the write worker takes their frame, preserving submission order.
const WRITE_QUEUE_CAPACITY: usize = 1;
const FAILURE_QUEUE_CAPACITY: usize = 4;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 8;

type FramedTransport = Framed<BoxedTransport, StompCodec>;
type WriteHalf = SplitSink<FramedTransport, StompItem>;
type ReadHalf = SplitStream<FramedTransport>;
type Heartbeats = (Option<Duration>, Option<Duration>);

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: smallest outgoing interval the client can guarantee, ms.
/// - `client_in`: incoming interval the client would like, ms.
/// - `server_out`: smallest outgoing interval the server can guarantee, ms.
/// - `server_in`: incoming interval the server would like, ms.
///
/// Returns `(outgoing, incoming)` where each element is `Some(Duration)` if
/// heartbeats are enabled in that direction, or `None` if disabled. Per
/// STOMP 1.2 a direction is enabled only when both parties opt in, and the
/// negotiated interval is the maximum of the two values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> Heartbeats {
    let outgoing = if client_out == 0 || server_in == 0 {
        None
    } else {
        Some(Duration::from_millis(client_out.max(server_in)))
    };
    let incoming = if client_in == 0 || server_out == 0 {
        None
    } else {
        Some(Duration::from_millis(client_in.max(server_out)))
    };
    (outgoing, incoming)
}

fn generate_id(rng: &mut StdRng) -> String {
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Build a SUBSCRIBE frame. The option list is applied verbatim, at subscribe
/// time and again on every replay, so an `ack` option keeps overriding the
/// default mode across reconnects.
fn subscribe_frame(id: &str, destination: &str, options: &[Opt]) -> Frame {
    let mut frame = Frame::new("SUBSCRIBE")
        .header("id", id)
        .header("destination", destination)
        .header("ack", AckMode::Auto.as_str());
    for opt in options {
        opt.apply(&mut frame);
    }
    frame
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer")
}

fn clone_io(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}

/// An outbound frame travelling to the write worker, with the channel the
/// per-write result comes back on.
struct WriteRequest {
    frame: Frame,
    reply: oneshot::Sender<Result<(), StompError>>,
}

/// Control handles for the current link generation. The session manager
/// swaps in fresh ones before every reconnect; the terminal transition fires
/// the shutdown of whichever generation is current.
struct LinkControls {
    writer: mpsc::Sender<WriteRequest>,
    shutdown: broadcast::Sender<()>,
}

struct Shared {
    registry: Mutex<Registry>,
    link: Mutex<LinkControls>,
    err: Mutex<Option<Arc<StompError>>>,
    closed: watch::Sender<bool>,
    ids: Mutex<StdRng>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn next_id(&self) -> String {
        generate_id(&mut self.ids.lock().unwrap())
    }

    /// Terminal transition, idempotent. The first caller latches the error,
    /// stops the current workers and closes every subscription sink.
    fn terminate(&self, err: Option<StompError>) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Some(err) = err {
            debug!(error = %err, "session closed");
            *self.err.lock().unwrap() = Some(Arc::new(err));
        }
        let _ = self.link.lock().unwrap().shutdown.send(());
        self.registry.lock().unwrap().clear();
    }
}

/// Reconnect behaviour for a connection.
///
/// The default configuration retries forever under [`exponential_backoff`]
/// but can only actually reconnect when a [`Connector`] is available:
/// [`Conn::dial`] installs a TCP one, while `connect` over a caller-provided
/// stream needs one supplied here or link failures become terminal.
pub struct ConnectConfig {
    retry: RetryPolicy,
    on_reconnect: Option<Box<dyn Fn(u32) + Send + Sync>>,
    connector: Option<Box<dyn Connector>>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            retry: Box::new(exponential_backoff),
            on_reconnect: None,
            connector: None,
        }
    }
}

impl ConnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retry policy consulted on every reconnect attempt.
    pub fn retry(
        mut self,
        policy: impl Fn(u32, Duration, &StompError) -> (bool, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.retry = Box::new(policy);
        self
    }

    /// Invoked with the attempt count after every successful reconnect.
    pub fn on_reconnect(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Box::new(hook));
        self
    }

    /// How to re-open the transport after a link failure.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }
}

/// A STOMP 1.2 session.
///
/// `Conn` is a cheap cloneable handle. Internally a session runs a read
/// worker and a write worker per live link plus one supervisor that owns
/// failure handling: retryable link errors tear the workers down, re-open
/// the transport through the connector, replay the registered subscriptions
/// and respawn the workers, invisibly to callers apart from latency.
/// Terminal errors (broker ERROR, protocol violations, retry refusal,
/// [`Conn::close`]) latch into the handle and close every subscription sink.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl Conn {
    /// Connect to a broker over TCP and run the STOMP handshake.
    ///
    /// The returned connection reconnects automatically by re-dialing
    /// `addr`. Options mutate the CONNECT frame (e.g.
    /// [`authenticate`](crate::options::authenticate),
    /// [`heartbeat`](crate::options::heartbeat)).
    pub async fn dial(addr: impl Into<String>, options: Vec<Opt>) -> Result<Conn, StompError> {
        Self::dial_with(addr, options, ConnectConfig::new()).await
    }

    /// Like [`Conn::dial`] with explicit reconnect configuration.
    pub async fn dial_with(
        addr: impl Into<String>,
        options: Vec<Opt>,
        mut config: ConnectConfig,
    ) -> Result<Conn, StompError> {
        let connector = TcpConnector::new(addr);
        let transport = connector.connect().await?;
        if config.connector.is_none() {
            config.connector = Some(Box::new(connector));
        }
        Self::establish(transport, options, config).await
    }

    /// Run the STOMP handshake over an already-open stream.
    ///
    /// Without a connector in the configuration the session cannot re-open
    /// the transport, so link failures are terminal.
    pub async fn connect<T: Transport + 'static>(
        stream: T,
        options: Vec<Opt>,
    ) -> Result<Conn, StompError> {
        Self::connect_with(stream, options, ConnectConfig::new()).await
    }

    /// Like [`Conn::connect`] with explicit reconnect configuration.
    pub async fn connect_with<T: Transport + 'static>(
        stream: T,
        options: Vec<Opt>,
        config: ConnectConfig,
    ) -> Result<Conn, StompError> {
        Self::establish(Box::new(stream), options, config).await
    }

    async fn establish(
        transport: BoxedTransport,
        options: Vec<Opt>,
        config: ConnectConfig,
    ) -> Result<Conn, StompError> {
        let mut framed = Framed::new(transport, StompCodec::new());
        let heartbeats = handshake(&mut framed, &options).await?;

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);
        let (failure_tx, failure_rx) = mpsc::channel(FAILURE_QUEUE_CAPACITY);
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new()),
            link: Mutex::new(LinkControls {
                writer: write_tx,
                shutdown: shutdown.clone(),
            }),
            err: Mutex::new(None),
            closed,
            ids: Mutex::new(StdRng::from_os_rng()),
        });

        spawn_workers(
            framed,
            heartbeats,
            shared.clone(),
            write_rx,
            failure_tx,
            &shutdown,
        );

        let supervisor = Supervisor {
            shared: shared.clone(),
            options,
            config,
        };
        tokio::spawn(supervisor.run(failure_rx, shutdown));

        Ok(Conn { shared })
    }

    /// Register a subscription and send its SUBSCRIBE frame.
    ///
    /// Resolves once the write worker has written the frame. The returned
    /// handle yields the destination's MESSAGE frames through a bounded
    /// queue and stays valid across reconnects: the session manager replays
    /// the SUBSCRIBE (same id, same options) on every new link.
    pub async fn subscribe(
        &self,
        destination: &str,
        options: Vec<Opt>,
    ) -> Result<Subscription, StompError> {
        if self.shared.is_closed() {
            return Err(StompError::Closed);
        }
        let id = self.shared.next_id();
        let (sender, receiver) = mpsc::channel(SINK_CAPACITY);
        {
            let mut registry = self.shared.registry.lock().unwrap();
            registry.insert(
                id.clone(),
                SubscriptionEntry {
                    destination: destination.to_string(),
                    sender,
                    options: options.clone(),
                },
            );
        }

        // Registered before the frame goes out, so a fast broker cannot hit
        // an unknown subscription and a concurrent reconnect replays it.
        let frame = subscribe_frame(&id, destination, &options);
        if let Err(err) = self.perform(frame, &[]).await {
            self.shared.registry.lock().unwrap().remove(&id);
            return Err(err);
        }

        Ok(Subscription::new(id, destination.to_string(), receiver))
    }

    /// Send UNSUBSCRIBE and close the subscription's sink.
    pub async fn unsubscribe(
        &self,
        sub: Subscription,
        options: Vec<Opt>,
    ) -> Result<(), StompError> {
        if self.shared.is_closed() {
            return Err(StompError::Closed);
        }
        let frame = Frame::new("UNSUBSCRIBE").header("id", sub.id());
        self.perform(frame, &options).await?;
        self.shared.registry.lock().unwrap().remove(sub.id());
        Ok(())
    }

    /// Send a message to `destination`. `content-length` is set from the
    /// body when it is non-empty.
    pub async fn send(
        &self,
        destination: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
        options: Vec<Opt>,
    ) -> Result<(), StompError> {
        let body = body.into();
        let mut frame = Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", content_type);
        if !body.is_empty() {
            frame = frame.header("content-length", body.len().to_string());
        }
        self.perform(frame.set_body(body), &options).await
    }

    /// Acknowledge a message. A no-op when the message carries no `ack`
    /// header (auto-mode subscription).
    pub async fn ack(&self, msg: &Message, options: Vec<Opt>) -> Result<(), StompError> {
        self.acknowledge("ACK", msg, options).await
    }

    /// Reject a message. A no-op when the message carries no `ack` header.
    pub async fn nack(&self, msg: &Message, options: Vec<Opt>) -> Result<(), StompError> {
        self.acknowledge("NACK", msg, options).await
    }

    async fn acknowledge(
        &self,
        command: &str,
        msg: &Message,
        options: Vec<Opt>,
    ) -> Result<(), StompError> {
        if self.shared.is_closed() {
            return Err(StompError::Closed);
        }
        let Some(ack_id) = msg.ack_id() else {
            return Ok(());
        };
        let frame = Frame::new(command).header("id", ack_id);
        self.perform(frame, &options).await
    }

    /// Close the session. Idempotent: the first call stops the workers and
    /// closes every subscription sink, later calls return `Ok` unchanged.
    pub async fn close(&self) -> Result<(), StompError> {
        self.shared.terminate(None);
        Ok(())
    }

    /// Whether the session reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The terminal error latched when the session closed, if any. A clean
    /// [`Conn::close`] latches nothing.
    pub fn last_error(&self) -> Option<Arc<StompError>> {
        self.shared.err.lock().unwrap().clone()
    }

    /// Apply `options`, queue the frame for the write worker and wait for
    /// the write result. While the session manager is reconnecting this
    /// parks on the fresh write queue, so callers see latency rather than
    /// failures.
    async fn perform(&self, mut frame: Frame, options: &[Opt]) -> Result<(), StompError> {
        if self.shared.is_closed() {
            return Err(StompError::Closed);
        }
        for opt in options {
            opt.apply(&mut frame);
        }
        let writer = self.shared.link.lock().unwrap().writer.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        writer
            .send(WriteRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StompError::Closed)?;
        reply_rx.await.map_err(|_| StompError::Closed)?
    }
}

/// Send CONNECT and wait for the broker's verdict.
///
/// Heart-beats and unrecognised frames are skipped while waiting; CONNECTED
/// yields the negotiated heart-beat intervals, ERROR fails the handshake.
async fn handshake(framed: &mut FramedTransport, options: &[Opt]) -> Result<Heartbeats, StompError> {
    let mut connect = Frame::new("CONNECT")
        .header("accept-version", "1.2")
        .header("host", DEFAULT_HOST)
        .header("heart-beat", DEFAULT_HEARTBEAT);
    for opt in options {
        opt.apply(&mut connect);
    }
    let (cx, cy) = parse_heartbeat_header(connect.get_header("heart-beat").unwrap_or("0,0"));

    framed
        .send(StompItem::Frame(connect))
        .await
        .map_err(StompError::from_io)?;

    loop {
        let item = framed
            .next()
            .await
            .ok_or_else(|| StompError::Transport(unexpected_eof()))?
            .map_err(StompError::from_io)?;
        match item {
            StompItem::Heartbeat => continue,
            StompItem::Frame(frame) => match frame.command.as_str() {
                "CONNECTED" => {
                    let (sx, sy) = Connected::new(frame).heart_beat();
                    return Ok(negotiate_heartbeats(cx, cy, sx, sy));
                }
                "ERROR" => return Err(StompError::Broker(BrokerError::new(frame))),
                _ => continue,
            },
        }
    }
}

fn spawn_workers(
    framed: FramedTransport,
    heartbeats: Heartbeats,
    shared: Arc<Shared>,
    write_rx: mpsc::Receiver<WriteRequest>,
    failure_tx: mpsc::Sender<StompError>,
    shutdown: &broadcast::Sender<()>,
) {
    let (outbound, inbound) = heartbeats;
    let (sink, stream) = framed.split();
    tokio::spawn(read_worker(
        stream,
        inbound,
        shared.clone(),
        failure_tx.clone(),
        shutdown.subscribe(),
    ));
    tokio::spawn(write_worker(
        sink,
        outbound,
        write_rx,
        shared,
        failure_tx,
        shutdown.subscribe(),
    ));
}

/// Resolves after `interval`, or never when the timer is disabled.
async fn timer(interval: Option<Duration>) {
    match interval {
        Some(d) => tokio::time::sleep(d).await,
        None => future::pending().await,
    }
}

/// Report a worker failure to the session manager. Quiet after the terminal
/// transition: errors raised by a deliberate teardown are not failures.
async fn escalate(shared: &Shared, failures: &mpsc::Sender<StompError>, err: StompError) {
    if shared.is_closed() {
        return;
    }
    debug!(error = %err, "worker escalating link failure");
    let _ = failures.send(err).await;
}

/// The read side of a live link: decode frames under the inbound heart-beat
/// deadline and dispatch them.
async fn read_worker(
    mut stream: ReadHalf,
    inbound: Option<Duration>,
    shared: Arc<Shared>,
    failures: mpsc::Sender<StompError>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let read_deadline = inbound.map(|d| d * 2);
    let grace = inbound.unwrap_or(SLOW_CONSUMER_GRACE);
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.recv() => return,
            _ = timer(read_deadline) => {
                let waited = read_deadline.unwrap_or_default();
                escalate(&shared, &failures, StompError::HeartbeatTimeout(waited)).await;
                return;
            }
            item = stream.next() => item,
        };

        let frame = match item {
            None => {
                escalate(&shared, &failures, StompError::Transport(unexpected_eof())).await;
                return;
            }
            Some(Err(err)) => {
                escalate(&shared, &failures, StompError::from_io(err)).await;
                return;
            }
            // Having decoded anything before the deadline proves liveness.
            Some(Ok(StompItem::Heartbeat)) => continue,
            Some(Ok(StompItem::Frame(frame))) => frame,
        };

        match frame.command.as_str() {
            "MESSAGE" => {
                if let Err(err) = dispatch_message(&shared, frame, grace).await {
                    escalate(&shared, &failures, err).await;
                    return;
                }
            }
            "ERROR" => {
                let err = StompError::Broker(BrokerError::new(frame));
                escalate(&shared, &failures, err).await;
                return;
            }
            // A CONNECTED after the handshake is a broker quirk; drop it.
            "CONNECTED" => {}
            _ => {}
        }
    }
}

/// Deliver a MESSAGE to its subscription sink, blocking up to `grace` when
/// the sink is full. A sink closed by a racing unsubscribe just drops the
/// message; a subscription id the registry has never seen is fatal.
async fn dispatch_message(
    shared: &Shared,
    frame: Frame,
    grace: Duration,
) -> Result<(), StompError> {
    let msg = Message::new(frame);
    let id = msg.subscription().unwrap_or_default().to_string();
    let sender = {
        let registry = shared.registry.lock().unwrap();
        registry.get(&id).map(|entry| entry.sender.clone())
    };
    let Some(sender) = sender else {
        return Err(StompError::UnknownSubscription(id));
    };
    match sender.send_timeout(msg, grace).await {
        Ok(()) => Ok(()),
        Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(StompError::SlowConsumer(id)),
        Err(mpsc::error::SendTimeoutError::Closed(_)) => Ok(()),
    }
}

/// The write side of a live link: sole consumer of the write queue, idle
/// heart-beat emitter. Branch order mirrors the event priorities: shutdown,
/// then the idle deadline, then pending frames.
async fn write_worker(
    mut sink: WriteHalf,
    outbound: Option<Duration>,
    mut queue: mpsc::Receiver<WriteRequest>,
    shared: Arc<Shared>,
    failures: mpsc::Sender<StompError>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let write_deadline = outbound.map(|d| d * 2);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                let _ = sink.close().await;
                return;
            }
            // Recreated every iteration, so any write resets the idle timer.
            _ = timer(outbound) => {
                if let Err(err) = write_item(&mut sink, StompItem::Heartbeat, write_deadline).await {
                    escalate(&shared, &failures, StompError::from_io(err)).await;
                    return;
                }
            }
            request = queue.recv() => {
                let Some(WriteRequest { frame, reply }) = request else {
                    return;
                };
                match write_item(&mut sink, StompItem::Frame(frame), write_deadline).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(StompError::Transport(clone_io(&err))));
                        escalate(&shared, &failures, StompError::from_io(err)).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Write one item under the link's write deadline; expiry maps to a
/// timed-out I/O error, which classifies as retryable.
async fn write_item(
    sink: &mut WriteHalf,
    item: StompItem,
    deadline: Option<Duration>,
) -> io::Result<()> {
    match deadline {
        Some(d) => match timeout(d, sink.send(item)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write deadline expired",
            )),
        },
        None => sink.send(item).await,
    }
}

/// The session manager: owns the failure channel of the current link
/// generation and decides retry versus terminal shutdown.
struct Supervisor {
    shared: Arc<Shared>,
    options: Vec<Opt>,
    config: ConnectConfig,
}

impl Supervisor {
    async fn run(
        self,
        mut failures: mpsc::Receiver<StompError>,
        mut shutdown: broadcast::Sender<()>,
    ) {
        let mut closed = self.shared.closed.subscribe();
        loop {
            let err = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => return,
                err = failures.recv() => match err {
                    Some(err) => err,
                    None => return,
                },
            };
            if self.shared.is_closed() {
                return;
            }

            // Stop both workers before deciding anything; the link is gone
            // either way.
            let _ = shutdown.send(());

            if !err.is_retryable() || self.config.connector.is_none() {
                self.shared.terminate(Some(err));
                return;
            }

            warn!(error = %err, "link failed, reconnecting");
            match self.reconnect(&mut closed, err).await {
                Some((new_failures, new_shutdown)) => {
                    failures = new_failures;
                    shutdown = new_shutdown;
                }
                None => return,
            }
        }
    }

    /// Drive the retry policy until a fresh link is open or the policy
    /// refuses. Returns the new generation's failure channel and shutdown
    /// handle on success, `None` on terminal shutdown.
    async fn reconnect(
        &self,
        closed: &mut watch::Receiver<bool>,
        mut last_err: StompError,
    ) -> Option<(mpsc::Receiver<StompError>, broadcast::Sender<()>)> {
        // Fresh channels for the next link generation. Swapping the writer
        // in before the first attempt parks callers on the new queue, so
        // operations submitted while reconnecting wait instead of failing.
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);
        let (failure_tx, failure_rx) = mpsc::channel(FAILURE_QUEUE_CAPACITY);
        {
            let mut link = self.shared.link.lock().unwrap();
            link.writer = write_tx;
            link.shutdown = shutdown.clone();
        }
        let mut write_rx = Some(write_rx);

        let mut attempt = 0u32;
        let mut backoff = Duration::ZERO;
        loop {
            attempt += 1;
            let (retry, sleep) = (self.config.retry)(attempt, backoff, &last_err);
            if !retry {
                self.shared.terminate(Some(last_err));
                return None;
            }
            backoff = sleep;

            tokio::select! {
                _ = closed.wait_for(|closed| *closed) => return None,
                _ = tokio::time::sleep(sleep) => {}
            }
            debug!(attempt, backoff_ms = sleep.as_millis() as u64, "reconnect attempt");

            match self.attempt().await {
                Ok((framed, heartbeats)) => {
                    if self.shared.is_closed() {
                        return None;
                    }
                    let Some(write_rx) = write_rx.take() else {
                        return None;
                    };
                    spawn_workers(
                        framed,
                        heartbeats,
                        self.shared.clone(),
                        write_rx,
                        failure_tx.clone(),
                        &shutdown,
                    );
                    if let Some(hook) = &self.config.on_reconnect {
                        hook(attempt);
                    }
                    debug!(attempt, "reconnected");
                    return Some((failure_rx, shutdown));
                }
                Err(err) => {
                    // A broker ERROR or protocol violation during the
                    // replayed handshake is as terminal as it is on a live
                    // link.
                    if !err.is_retryable() {
                        self.shared.terminate(Some(err));
                        return None;
                    }
                    debug!(attempt, error = %err, "reconnect attempt failed");
                    last_err = err;
                }
            }
        }
    }

    /// One reconnect attempt: open a transport, redo the handshake and
    /// replay every registered subscription with its original id,
    /// destination and options before the workers take over the link.
    async fn attempt(&self) -> Result<(FramedTransport, Heartbeats), StompError> {
        let Some(connector) = self.config.connector.as_ref() else {
            return Err(StompError::Closed);
        };
        let transport = connector.connect().await?;
        let mut framed = Framed::new(transport, StompCodec::new());
        let heartbeats = handshake(&mut framed, &self.options).await?;

        let snapshot: Vec<(String, String, Vec<Opt>)> = {
            let registry = self.shared.registry.lock().unwrap();
            registry
                .iter()
                .map(|(id, entry)| (id.clone(), entry.destination.clone(), entry.options.clone()))
                .collect()
        };
        for (id, destination, options) in snapshot {
            let frame = subscribe_frame(&id, &destination, &options);
            framed
                .send(StompItem::Frame(frame))
                .await
                .map_err(StompError::from_io)?;
        }

        Ok((framed, heartbeats))
    }
}
