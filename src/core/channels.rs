//! Channel seams between the key-exchange session and the kit hardware.
//!
//! The byte framing of the real transport lives outside this crate. A session
//! only needs two things from it:
//! - a [`QuantumLink`] that answers one firmware command with one reply line,
//! - a [`ControlChannel`] that carries 4-byte packets tagged with the sender's role.
//!
//! Every blocking receive takes a [`Waiter`], which bounds the wait and
//! observes a shared [`CancelToken`].

use crate::core::errors::{ChannelError, DecodeError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Byte that forces the peer to stop listening.
pub const END_OF_SESSION: u8 = b'#';

/// Bell byte repeated at the start of every role header.
const BELL: u8 = 0x07;

/// Which side of the exchange a party plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Alice: prepares and transmits the polarization sequence.
    Sender,
    /// Bob: picks measurement bases and reports them for sifting.
    Receiver,
}

impl Role {
    pub fn tag(self) -> u8 {
        match self {
            Role::Sender => b'A',
            Role::Receiver => b'B',
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    /// The 3-byte bell header followed by the role tag.
    pub fn header(self) -> [u8; 4] {
        [BELL, BELL, BELL, self.tag()]
    }
}

/// A control-channel message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packet {
    Data { from: Role, payload: [u8; 4] },
    /// The peer gave up on the session.
    EndOfSession,
}

impl Packet {
    pub fn data(from: Role, payload: [u8; 4]) -> Self {
        Packet::Data { from, payload }
    }

    /// Hex field the transport prints for a role header, e.g. `07070741`.
    pub fn header_field(role: Role) -> String {
        hex_field(&role.header())
    }

    /// Hex field the transport prints for a payload.
    pub fn payload_field(payload: &[u8; 4]) -> String {
        hex_field(payload)
    }

    /// Parses a transport hex field back into 4 bytes.
    ///
    /// The transport drops a leading zero, so fields shorter than 8 digits
    /// are left-padded first.
    pub fn parse_field(field: &str) -> Result<[u8; 4], DecodeError> {
        let field = field.trim();
        if field.len() > 8 {
            return Err(DecodeError::UnexpectedPacket {
                expected: "8 hex digits".into(),
                got: field.to_string(),
            });
        }
        if let Some(bad) = field.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidHex(bad));
        }
        let padded = format!("{field:0>8}");

        let mut out = [0u8; 4];
        for (i, byte) in out.iter_mut().enumerate() {
            let pair = &padded[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| DecodeError::InvalidHex('?'))?;
        }
        Ok(out)
    }

    /// Which role a header field announces, if it is one.
    pub fn header_role(field: &str) -> Option<Role> {
        let bytes = Self::parse_field(field).ok()?;
        [Role::Sender, Role::Receiver]
            .into_iter()
            .find(|r| r.header() == bytes)
    }
}

fn hex_field(bytes: &[u8; 4]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cooperative cancellation flag shared between a session and whoever may
/// interrupt it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bounded wait for a single blocking receive.
#[derive(Clone, Debug)]
pub struct Waiter {
    started: Instant,
    timeout: Duration,
    poll: Duration,
    cancel: CancelToken,
}

impl Waiter {
    pub fn new(timeout: Duration, poll: Duration, cancel: CancelToken) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            poll: poll.max(Duration::from_millis(1)),
            cancel,
        }
    }

    /// Same bound and token, with the clock restarted.
    pub fn renew(&self) -> Waiter {
        Waiter::new(self.timeout, self.poll, self.cancel.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Errors once the token is raised or the bound has elapsed.
    pub fn check(&self) -> Result<(), ChannelError> {
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        if self.started.elapsed() >= self.timeout {
            return Err(ChannelError::Timeout(self.timeout));
        }
        Ok(())
    }

    /// How long the next poll may block.
    pub fn slice(&self) -> Duration {
        let left = self.timeout.saturating_sub(self.started.elapsed());
        left.min(self.poll)
    }

    /// Polls `attempt` until it yields a value, the bound elapses, or the
    /// token is raised. `attempt` may block for at most the given slice.
    pub fn wait_for<T, F>(&self, mut attempt: F) -> Result<T, ChannelError>
    where
        F: FnMut(Duration) -> Result<Option<T>, ChannelError>,
    {
        loop {
            self.check()?;
            if let Some(value) = attempt(self.slice())? {
                return Ok(value);
            }
        }
    }
}

/// Command/reply link to the kit's quantum-side microcontroller.
pub trait QuantumLink {
    /// Sends one firmware command and blocks for one reply line.
    fn query(&mut self, command: &str, waiter: &Waiter) -> Result<String, ChannelError>;
}

/// Half-duplex classical channel between the two parties.
pub trait ControlChannel {
    fn send(&mut self, packet: Packet) -> Result<(), ChannelError>;

    /// Blocks for the next packet within the waiter's bound.
    fn recv(&mut self, waiter: &Waiter) -> Result<Packet, ChannelError>;

    /// Tells the peer to stop listening.
    fn end_session(&mut self) -> Result<(), ChannelError> {
        self.send(Packet::EndOfSession)
    }
}

/// In-process control channel endpoint, connected to its twin by
/// [`MemoryChannel::pair`].
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (tx_a, rx_b) = mpsc::channel();
        let (tx_b, rx_a) = mpsc::channel();
        (
            MemoryChannel { tx: tx_a, rx: rx_a },
            MemoryChannel { tx: tx_b, rx: rx_b },
        )
    }
}

impl ControlChannel for MemoryChannel {
    fn send(&mut self, packet: Packet) -> Result<(), ChannelError> {
        self.tx.send(packet).map_err(|_| ChannelError::Closed)
    }

    fn recv(&mut self, waiter: &Waiter) -> Result<Packet, ChannelError> {
        waiter.wait_for(|slice| match self.rx.recv_timeout(slice) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(ms: u64) -> Waiter {
        Waiter::new(
            Duration::from_millis(ms),
            Duration::from_millis(5),
            CancelToken::new(),
        )
    }

    #[test]
    fn header_fields_match_transport() {
        assert_eq!(Packet::header_field(Role::Sender), "07070741");
        assert_eq!(Packet::header_field(Role::Receiver), "07070742");
        assert_eq!(Packet::header_role("7070741"), Some(Role::Sender));
        assert_eq!(Packet::header_role("4f4b2121"), None);
    }

    #[test]
    fn payload_field_round_trips() {
        let field = Packet::payload_field(b"OK!!");
        assert_eq!(field, "4f4b2121");
        assert_eq!(Packet::parse_field(&field).unwrap(), *b"OK!!");
        assert_eq!(Packet::parse_field("zz"), Err(DecodeError::InvalidHex('z')));
    }

    #[test]
    fn memory_pair_delivers_both_ways() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.send(Packet::data(Role::Sender, *b"QKD?")).unwrap();
        b.send(Packet::data(Role::Receiver, *b"OK!!")).unwrap();

        assert_eq!(
            b.recv(&waiter(100)).unwrap(),
            Packet::data(Role::Sender, *b"QKD?")
        );
        assert_eq!(
            a.recv(&waiter(100)).unwrap(),
            Packet::data(Role::Receiver, *b"OK!!")
        );
    }

    #[test]
    fn silent_peer_times_out() {
        let (mut a, _b) = MemoryChannel::pair();
        let err = a.recv(&waiter(20)).unwrap_err();
        assert_eq!(err, ChannelError::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn dropped_peer_closes() {
        let (mut a, b) = MemoryChannel::pair();
        drop(b);
        assert_eq!(a.recv(&waiter(100)).unwrap_err(), ChannelError::Closed);
    }

    #[test]
    fn raised_token_cancels_wait() {
        let (mut a, _b) = MemoryChannel::pair();
        let token = CancelToken::new();
        token.cancel();
        let waiter = Waiter::new(Duration::from_secs(5), Duration::from_millis(5), token);
        assert_eq!(a.recv(&waiter).unwrap_err(), ChannelError::Cancelled);
    }
}
