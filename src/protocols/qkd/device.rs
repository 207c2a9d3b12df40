//! One round of measurement driven through the kit firmware.
//!
//! Sender firmware: `RNDSEQ` picks a random sequence, `SEQ?` reports it as one
//! digit per slot (value bit high, basis bit low), `TXSEQ` transmits it.
//! Receiver firmware: `RNDBAS` picks random bases, `SEQ?` reports them as
//! bits, `RXSEQ` measures and replies with one detector reading per slot.

use crate::config::SessionConfig;
use crate::core::errors::{DecodeError, RoundError};
use crate::core::utils::parse_bits;
use crate::core::{QuantumLink, Role, Waiter};
use crate::measure::RawKey;
use crate::protocols::qkd::session::RoundSource;

pub const CMD_RANDOM_SEQUENCE: &str = "RNDSEQ ";
pub const CMD_RANDOM_BASES: &str = "RNDBAS ";
pub const CMD_QUERY_SEQUENCE: &str = "SEQ? ";
pub const CMD_TRANSMIT: &str = "TXSEQ ";
pub const CMD_RECEIVE: &str = "RXSEQ ";

/// Measurement source backed by a kit microcontroller.
pub struct DeviceSource<L> {
    role: Role,
    link: L,
    detection_threshold: i64,
}

impl<L: QuantumLink> DeviceSource<L> {
    /// A source with the default settings for `role`.
    pub fn new(role: Role, link: L) -> Self {
        Self::from_config(&SessionConfig::new(role), link)
    }

    /// Takes the role and detection threshold from a session config.
    pub fn from_config(config: &SessionConfig, link: L) -> Self {
        Self {
            role: config.role,
            link,
            detection_threshold: config.detection_threshold,
        }
    }

    /// Receiver only: readings above this are a 0 bit, the rest a 1 bit.
    pub fn with_detection_threshold(mut self, threshold: i64) -> Self {
        self.detection_threshold = threshold;
        self
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    fn send_round(&mut self, waiter: &Waiter) -> Result<RawKey, RoundError> {
        let ack = self.link.query(CMD_RANDOM_SEQUENCE, &waiter.renew())?;
        tracing::debug!(reply = %ack.trim(), "sequence randomised");

        let sequence = self.link.query(CMD_QUERY_SEQUENCE, &waiter.renew())?;
        let (values, bases) = parse_sender_sequence(&sequence)?;

        let ack = self.link.query(CMD_TRANSMIT, &waiter.renew())?;
        tracing::debug!(reply = %ack.trim(), slots = values.len(), "sequence transmitted");

        Ok(RawKey::from_bits(&values, &bases))
    }

    fn receive_round(&mut self, waiter: &Waiter) -> Result<RawKey, RoundError> {
        let ack = self.link.query(CMD_RANDOM_BASES, &waiter.renew())?;
        tracing::debug!(reply = %ack.trim(), "bases randomised");

        let bases = parse_bits(self.link.query(CMD_QUERY_SEQUENCE, &waiter.renew())?.trim())?;

        let reply = self.link.query(CMD_RECEIVE, &waiter.renew())?;
        let values = threshold_readings(&reply, self.detection_threshold);
        if values.len() != bases.len() {
            return Err(DecodeError::Truncated {
                expected: bases.len(),
                got: values.len(),
            }
            .into());
        }

        Ok(RawKey::from_bits(&values, &bases))
    }
}

impl<L: QuantumLink> RoundSource for DeviceSource<L> {
    fn next_round(&mut self, waiter: &Waiter) -> Result<RawKey, RoundError> {
        match self.role {
            Role::Sender => self.send_round(waiter),
            Role::Receiver => self.receive_round(waiter),
        }
    }
}

/// Splits each sequence digit into its value bit (high) and basis bit (low).
fn parse_sender_sequence(reply: &str) -> Result<(Vec<bool>, Vec<bool>), DecodeError> {
    let mut values = Vec::new();
    let mut bases = Vec::new();
    for c in reply.chars().filter(|c| !c.is_whitespace()) {
        let code = c
            .to_digit(10)
            .filter(|&d| d < 4)
            .ok_or(DecodeError::InvalidCode(c))?;
        values.push(code / 2 == 1);
        bases.push(code % 2 == 1);
    }
    Ok((values, bases))
}

/// Converts detector readings to bits; non-numeric tokens are skipped.
fn threshold_readings(reply: &str, threshold: i64) -> Vec<bool> {
    reply
        .split_whitespace()
        .filter_map(|token| match token.parse::<i64>() {
            Ok(reading) => Some(reading <= threshold),
            Err(_) => {
                tracing::warn!(token, "skipping non-numeric detector reading");
                None
            }
        })
        .collect()
}
