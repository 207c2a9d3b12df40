//! Live key exchange: handshake, then measure/exchange/sift rounds until the
//! accumulated key reaches the target length.
//!
//! The session owns its measurement source and control channel for its whole
//! lifetime; [`KeyExchangeSession::run`] consumes it. Any error or a raised
//! [`CancelToken`] abandons the session: the end-of-session signal is sent to
//! the peer and no key is returned.
//!
//! Each round both parties announce their block count right after `RDY!`, so
//! a round the two sides measured differently fails on both ends.

use crate::config::SessionConfig;
use crate::core::errors::{
    ChannelError, DecodeError, ReconciliationError, RoundError, SessionError,
};
use crate::core::utils::{from_hex, to_hex};
use crate::core::{CancelToken, ControlChannel, Packet, Role, Waiter};
use crate::measure::RawKey;
use crate::protocols::qkd::sifting::{BLOCK_BITS, ReconciliationMask, sift};

/// Sender's opening packet.
pub const PROBE: [u8; 4] = *b"QKD?";
/// Receiver's answer to the probe.
pub const ACK: [u8; 4] = *b"OK!!";
/// Sender announces that a round's sequence has been transmitted.
pub const READY: [u8; 4] = *b"RDY!";

/// Produces one round of raw key material.
pub trait RoundSource {
    fn next_round(&mut self, waiter: &Waiter) -> Result<RawKey, RoundError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Handshake,
    Round(usize),
    Done,
    Cancelled,
}

/// Output of a completed session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalKey {
    pub bits: Vec<bool>,
    /// Lowercase hex, `ceil(bits / 4)` digits.
    pub hex: String,
    pub attempts: usize,
}

pub struct KeyExchangeSession<S, C> {
    config: SessionConfig,
    source: S,
    control: C,
    cancel: CancelToken,
    accumulated_key: Vec<bool>,
    attempt_count: usize,
    state: SessionState,
}

impl<S: RoundSource, C: ControlChannel> KeyExchangeSession<S, C> {
    pub fn new(config: SessionConfig, source: S, control: C) -> Self {
        Self {
            config,
            source,
            control,
            cancel: CancelToken::new(),
            accumulated_key: Vec::new(),
            attempt_count: 0,
            state: SessionState::Handshake,
        }
    }

    /// Shares an externally held token, e.g. one raised by a signal handler.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Runs to completion or cancellation.
    pub fn run(mut self) -> Result<FinalKey, SessionError> {
        match self.drive() {
            Ok(key) => {
                tracing::info!(
                    role = ?self.config.role,
                    attempts = key.attempts,
                    bits = key.bits.len(),
                    "key exchange complete"
                );
                Ok(key)
            }
            Err(err) => {
                let attempt = self.attempt_count;
                self.abort();
                Err(match err {
                    RoundError::Channel(ChannelError::Cancelled) => {
                        SessionError::Cancelled { attempt }
                    }
                    source => SessionError::Failed { attempt, source },
                })
            }
        }
    }

    fn drive(&mut self) -> Result<FinalKey, RoundError> {
        self.transition(SessionState::Handshake);
        self.handshake()?;

        let target = self.config.target_length;
        while self.accumulated_key.len() < target {
            self.ensure_not_cancelled()?;
            if self.attempt_count >= self.config.max_attempts {
                return Err(RoundError::AttemptsExhausted {
                    attempts: self.attempt_count,
                    bits: self.accumulated_key.len(),
                    target,
                });
            }
            self.attempt_count += 1;
            self.transition(SessionState::Round(self.attempt_count));

            let sifted = self.round()?;
            self.accumulated_key.extend_from_slice(&sifted);
            tracing::info!(
                attempt = self.attempt_count,
                gained = sifted.len(),
                total = self.accumulated_key.len(),
                target,
                "round complete"
            );
        }

        self.accumulated_key.truncate(target);
        self.transition(SessionState::Done);

        let bits = std::mem::take(&mut self.accumulated_key);
        let hex = to_hex(&bits, target.div_ceil(4));
        Ok(FinalKey {
            bits,
            hex,
            attempts: self.attempt_count,
        })
    }

    fn handshake(&mut self) -> Result<(), RoundError> {
        match self.config.role {
            Role::Sender => {
                self.send(PROBE)?;
                self.expect(ACK)
            }
            Role::Receiver => {
                self.expect(PROBE)?;
                self.send(ACK)
            }
        }
    }

    /// Measure, exchange bases, sift. Returns the bits gained this round.
    fn round(&mut self) -> Result<Vec<bool>, RoundError> {
        let raw = self.source.next_round(&self.waiter())?;
        if raw.is_empty() || raw.len() % BLOCK_BITS != 0 {
            return Err(DecodeError::PartialBlock(raw.len()).into());
        }
        let blocks = raw.len() / BLOCK_BITS;
        let count = u16::try_from(blocks).map_err(|_| DecodeError::RoundTooLong(raw.len()))?;
        tracing::debug!(
            attempt = self.attempt_count,
            symbols = %raw.symbol_string(),
            "round measured"
        );

        let mask = match self.config.role {
            Role::Sender => {
                self.send(READY)?;
                self.send(count_payload(count))?;
                let peer_count = self.recv_count()?;
                check_round_length(count, peer_count)?;

                let mut peer_bases = Vec::with_capacity(raw.len());
                for _ in 0..blocks {
                    peer_bases.extend(self.recv_block()?);
                }
                let mask = ReconciliationMask::from_bases(&raw.basis_bits, &peer_bases)?;
                for block in mask.bits().chunks(BLOCK_BITS) {
                    self.send(block_payload(block))?;
                }
                mask
            }
            Role::Receiver => {
                self.expect(READY)?;
                let peer_count = self.recv_count()?;
                self.send(count_payload(count))?;
                check_round_length(count, peer_count)?;

                for block in raw.basis_bits.chunks(BLOCK_BITS) {
                    self.send(block_payload(block))?;
                }
                let mut mask_bits = Vec::with_capacity(raw.len());
                for _ in 0..blocks {
                    mask_bits.extend(self.recv_block()?);
                }
                ReconciliationMask::new(mask_bits)?
            }
        };

        tracing::debug!(attempt = self.attempt_count, mask = %mask.to_hex(), "bases reconciled");
        Ok(sift(&raw.key_bits, &mask)?)
    }

    fn waiter(&self) -> Waiter {
        Waiter::new(
            self.config.receive_timeout(),
            self.config.poll_interval(),
            self.cancel.clone(),
        )
    }

    fn ensure_not_cancelled(&self) -> Result<(), ChannelError> {
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        Ok(())
    }

    fn send(&mut self, payload: [u8; 4]) -> Result<(), RoundError> {
        self.ensure_not_cancelled()?;
        Ok(self.control.send(Packet::data(self.config.role, payload))?)
    }

    /// Next payload from the peer. Packets carrying our own role are echoes
    /// of what we sent and are skipped.
    fn recv_payload(&mut self) -> Result<[u8; 4], RoundError> {
        let waiter = self.waiter();
        let peer = self.config.role.peer();
        loop {
            match self.control.recv(&waiter)? {
                Packet::Data { from, payload } if from == peer => return Ok(payload),
                Packet::Data { payload, .. } => {
                    tracing::debug!(payload = ?payload, "ignoring own echo");
                }
                Packet::EndOfSession => return Err(ChannelError::Closed.into()),
            }
        }
    }

    fn expect(&mut self, expected: [u8; 4]) -> Result<(), RoundError> {
        let got = self.recv_payload()?;
        if got != expected {
            return Err(DecodeError::UnexpectedPacket {
                expected: String::from_utf8_lossy(&expected).into_owned(),
                got: String::from_utf8_lossy(&got).into_owned(),
            }
            .into());
        }
        Ok(())
    }

    /// One 16-bit block sent as four hex characters.
    fn recv_block(&mut self) -> Result<Vec<bool>, RoundError> {
        let payload = self.recv_payload()?;
        let text = String::from_utf8_lossy(&payload);
        Ok(from_hex(&text)?)
    }

    /// The peer's announced block count for this round.
    fn recv_count(&mut self) -> Result<u16, RoundError> {
        let bits = self.recv_block()?;
        Ok(bits.iter().fold(0, |n, &bit| (n << 1) | u16::from(bit)))
    }

    fn transition(&mut self, next: SessionState) {
        tracing::info!(role = ?self.config.role, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Tells the peer we are gone and drops any partial key.
    fn abort(&mut self) {
        self.transition(SessionState::Cancelled);
        self.accumulated_key.clear();
        if let Err(err) = self.control.end_session() {
            tracing::warn!(error = %err, "could not send end-of-session signal");
        }
    }
}

/// Both parties must measure the same number of blocks, or the masks they
/// exchange cover different keys.
fn check_round_length(own: u16, peer: u16) -> Result<(), ReconciliationError> {
    if own != peer {
        return Err(ReconciliationError::MaskLengthMismatch {
            key: usize::from(own) * BLOCK_BITS,
            mask: usize::from(peer) * BLOCK_BITS,
        });
    }
    Ok(())
}

fn count_payload(blocks: u16) -> [u8; 4] {
    let mut payload = [b'0'; 4];
    payload.copy_from_slice(format!("{blocks:04x}").as_bytes());
    payload
}

fn block_payload(block: &[bool]) -> [u8; 4] {
    let mut payload = [b'0'; 4];
    for (slot, digit) in payload.iter_mut().zip(to_hex(block, 4).bytes()) {
        *slot = digit;
    }
    payload
}
