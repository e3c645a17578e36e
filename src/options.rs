//! Option combinators that shape a frame before it is encoded.
//!
//! Each option is a pure header mutation; options compose by sequential
//! application in caller order. Connection entry points apply them to the
//! CONNECT frame, `subscribe` applies (and stores) them on SUBSCRIBE, and the
//! remaining operations apply them to their outbound frame.

use std::fmt;
use std::sync::Arc;

use crate::frame::Frame;
use crate::subscription::AckMode;

/// A cloneable frame modifier.
///
/// Subscriptions keep their option list so the exact same set is reapplied
/// when the session manager replays SUBSCRIBE frames after a reconnect.
#[derive(Clone)]
pub struct Opt(Arc<dyn Fn(&mut Frame) + Send + Sync>);

impl Opt {
    /// Apply this option to a frame.
    pub fn apply(&self, frame: &mut Frame) {
        (self.0)(frame)
    }
}

impl fmt::Debug for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opt(..)")
    }
}

/// Sets the `host` header: the virtual host the client wishes to connect to.
pub fn host(host: impl Into<String>) -> Opt {
    let host = host.into();
    Opt(Arc::new(move |f| f.set_header("host", host.clone())))
}

/// Sets the `heart-beat` header on the CONNECT frame.
///
/// `cx` is the smallest interval in milliseconds between heart-beats this
/// client can guarantee on the outgoing side (0: it cannot send any), and
/// `cy` the desired interval for incoming heart-beats (0: none wanted). The
/// effective intervals come out of negotiation with the server's CONNECTED
/// reply.
pub fn heartbeat(cx: u64, cy: u64) -> Opt {
    Opt(Arc::new(move |f| {
        f.set_header("heart-beat", format!("{},{}", cx, cy))
    }))
}

/// Sets the `login` and `passcode` headers to authenticate against a secured
/// broker.
pub fn authenticate(login: impl Into<String>, passcode: impl Into<String>) -> Opt {
    let login = login.into();
    let passcode = passcode.into();
    Opt(Arc::new(move |f| {
        f.set_header("login", login.clone());
        f.set_header("passcode", passcode.clone());
    }))
}

/// Sets the `ack` header of a SUBSCRIBE frame to the given mode.
pub fn ack(mode: AckMode) -> Opt {
    Opt(Arc::new(move |f| f.set_header("ack", mode.as_str())))
}

/// Sets `persistent: true`, asking the broker to persist the message so it
/// survives a broker failure. Supported by at least ActiveMQ and Apollo;
/// persistent delivery costs considerably more than the default, so use it
/// only when the application needs it.
pub fn persist() -> Opt {
    Opt(Arc::new(|f| f.set_header("persistent", "true")))
}

/// Wraps an arbitrary frame mutation, e.g. for broker-specific headers:
///
/// ```ignore
/// let expires = options::custom(|f| f.set_header("expires", "1308690148000"));
/// conn.send("/queue/test", "text/plain", b"...".to_vec(), vec![expires]).await?;
/// ```
pub fn custom(f: impl Fn(&mut Frame) + Send + Sync + 'static) -> Opt {
    Opt(Arc::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_compose_in_caller_order() {
        let mut frame = Frame::new("CONNECT");
        for opt in [host("first"), host("second")] {
            opt.apply(&mut frame);
        }
        assert_eq!(frame.get_header("host"), Some("second"));
        assert_eq!(frame.headers.len(), 1);
    }

    #[test]
    fn ack_overrides_default_mode() {
        let mut frame = Frame::new("SUBSCRIBE").header("ack", "auto");
        ack(AckMode::ClientIndividual).apply(&mut frame);
        assert_eq!(frame.get_header("ack"), Some("client-individual"));
    }

    #[test]
    fn authenticate_sets_both_headers() {
        let mut frame = Frame::new("CONNECT");
        authenticate("user", "secret").apply(&mut frame);
        assert_eq!(frame.get_header("login"), Some("user"));
        assert_eq!(frame.get_header("passcode"), Some("secret"));
    }
}
