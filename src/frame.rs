use std::fmt;

/// A STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered list
/// of headers (key/value pairs) and the raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Parameters
    /// - `command`: the STOMP command name (for example, `"SEND"` or
    ///   `"SUBSCRIBE"`). Accepts any type convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    ///
    /// Parameters
    /// - `body`: raw body bytes. Accepts any type convertible into `Vec<u8>`.
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists. The first occurrence of a repeated
    /// header wins, per STOMP 1.2.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first occurrence of `key`, or append the header if it is
    /// not present. Option combinators use this so a later option overrides
    /// an earlier value instead of producing a duplicate header line.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((key, value)),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// A server MESSAGE frame with accessors over its well-known headers.
///
/// This is a thin projection over [`Frame`]; the underlying frame stays
/// reachable through the public `frame` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub frame: Frame,
}

impl Message {
    pub(crate) fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// The `message-id` header.
    pub fn id(&self) -> Option<&str> {
        self.frame.get_header("message-id")
    }

    /// The `destination` header.
    pub fn destination(&self) -> Option<&str> {
        self.frame.get_header("destination")
    }

    /// The `subscription` header identifying the subscription this message
    /// was delivered for.
    pub fn subscription(&self) -> Option<&str> {
        self.frame.get_header("subscription")
    }

    /// The `ack` header. Absent on messages delivered to `auto` subscriptions,
    /// in which case `Conn::ack`/`Conn::nack` are no-ops.
    pub fn ack_id(&self) -> Option<&str> {
        self.frame.get_header("ack")
    }

    /// The `content-type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.frame.get_header("content-type")
    }

    /// The `content-length` header, when present and parseable.
    pub fn content_length(&self) -> Option<usize> {
        self.frame
            .get_header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// The message payload.
    pub fn body(&self) -> &[u8] {
        &self.frame.body
    }
}

/// A server CONNECTED frame, received once per handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub frame: Frame,
}

impl Connected {
    pub(crate) fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// The negotiated protocol version reported by the server.
    pub fn version(&self) -> Option<&str> {
        self.frame.get_header("version")
    }

    /// The server's `heart-beat` header as `(sx, sy)` milliseconds. Missing
    /// or malformed fields read as 0 (disabled).
    pub fn heart_beat(&self) -> (u64, u64) {
        crate::connection::parse_heartbeat_header(
            self.frame.get_header("heart-beat").unwrap_or(""),
        )
    }
}

/// A server ERROR frame. Receiving one is terminal for the session; the
/// frame is carried inside [`crate::StompError::Broker`](crate::StompError)
/// and latched on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub frame: Frame,
}

impl BrokerError {
    pub(crate) fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// Human-readable error text: the `message` header when present,
    /// otherwise a generic default.
    pub fn message(&self) -> &str {
        match self.frame.get_header("message") {
            Some(msg) if !msg.is_empty() => msg,
            _ => "client received ERROR frame",
        }
    }

    /// The error payload sent by the broker, often a longer description.
    pub fn body(&self) -> &[u8] {
        &self.frame.body
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for BrokerError {}
