use qkdkit::config::SessionConfig;
use qkdkit::errors::ChannelError;
use qkdkit::protocols::device::{
    CMD_QUERY_SEQUENCE, CMD_RANDOM_BASES, CMD_RANDOM_SEQUENCE, CMD_RECEIVE, CMD_TRANSMIT,
    DeviceSource,
};
use qkdkit::protocols::session::{KeyExchangeSession, PROBE, RoundSource};
use qkdkit::{ControlChannel, MemoryChannel, Packet, QuantumLink, Role, Waiter};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Firmware stand-in that answers every command from a fixed table and keeps
/// a log of what it was asked.
struct Firmware {
    replies: HashMap<&'static str, String>,
    log: Vec<String>,
}

impl Firmware {
    fn new(replies: &[(&'static str, &str)]) -> Self {
        Self {
            replies: replies.iter().map(|&(c, r)| (c, r.to_string())).collect(),
            log: Vec::new(),
        }
    }
}

impl QuantumLink for Firmware {
    fn query(&mut self, command: &str, waiter: &Waiter) -> Result<String, ChannelError> {
        waiter.check()?;
        self.log.push(command.trim().to_string());
        self.replies
            .get(command)
            .cloned()
            .ok_or_else(|| ChannelError::Transport(format!("unknown command {command:?}")))
    }
}

fn alice_firmware() -> Firmware {
    Firmware::new(&[
        (CMD_RANDOM_SEQUENCE, "OK\r\n"),
        // value 1, 0, 1, 0, ... all in the rectilinear basis
        (CMD_QUERY_SEQUENCE, "2020202020202020\r\n"),
        (CMD_TRANSMIT, "OK\r\n"),
    ])
}

fn bob_firmware() -> Firmware {
    Firmware::new(&[
        (CMD_RANDOM_BASES, "OK\r\n"),
        (CMD_QUERY_SEQUENCE, "0000000000000000\r\n"),
        (
            CMD_RECEIVE,
            "100 900 100 900 100 900 100 900 100 900 100 900 100 900 100 900\r\n",
        ),
    ])
}

fn config(role: Role) -> SessionConfig {
    SessionConfig::new(role)
        .with_target_length(32)
        .with_timeout(Duration::from_secs(2))
}

#[test]
fn device_driven_exchange_agrees_on_a_32_bit_key() {
    let (alice_ch, bob_ch) = MemoryChannel::pair();

    let alice_config = config(Role::Sender);
    let alice = KeyExchangeSession::new(
        alice_config.clone(),
        DeviceSource::from_config(&alice_config, alice_firmware()),
        alice_ch,
    );
    let handle = thread::spawn(move || alice.run());

    let bob_config = config(Role::Receiver);
    let bob = KeyExchangeSession::new(
        bob_config.clone(),
        DeviceSource::from_config(&bob_config, bob_firmware()),
        bob_ch,
    );

    let bob_key = bob.run().unwrap();
    let alice_key = handle.join().unwrap().unwrap();

    assert_eq!(bob_key.hex, "aaaaaaaa");
    assert_eq!(bob_key.bits.len(), 32);
    assert_eq!(bob_key.attempts, 2);
    assert_eq!(alice_key, bob_key);
}

#[test]
fn firmware_sees_commands_in_round_order() {
    let mut source = DeviceSource::new(Role::Sender, alice_firmware());
    let waiter = Waiter::new(
        Duration::from_secs(1),
        Duration::from_millis(5),
        qkdkit::CancelToken::new(),
    );
    let raw = source.next_round(&waiter).unwrap();
    assert_eq!(raw.key_hex(), "aaaa");
    assert_eq!(raw.basis_hex(), "0000");

    let firmware = source.into_inner();
    assert_eq!(firmware.log, ["RNDSEQ", "SEQ?", "TXSEQ"]);
}

#[test]
fn peer_hanging_up_mid_round_fails_the_session() {
    let (bob_ch, mut alice_ch) = MemoryChannel::pair();
    alice_ch.send(Packet::data(Role::Sender, PROBE)).unwrap();
    alice_ch.end_session().unwrap();

    let bob = KeyExchangeSession::new(
        config(Role::Receiver),
        DeviceSource::new(Role::Receiver, bob_firmware()),
        bob_ch,
    );
    let err = bob.run().unwrap_err();
    assert_eq!(err.kind(), "ChannelError");
    assert_eq!(err.attempt(), 1);

    let waiter = Waiter::new(
        Duration::from_millis(200),
        Duration::from_millis(5),
        qkdkit::CancelToken::new(),
    );
    // ACK from the handshake, then the end-of-session signal
    assert!(matches!(alice_ch.recv(&waiter), Ok(Packet::Data { from: Role::Receiver, .. })));
    assert_eq!(alice_ch.recv(&waiter), Ok(Packet::EndOfSession));
}

#[test]
fn session_config_round_trips_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bob.json");
    config(Role::Receiver).save(&path).unwrap();

    let loaded = SessionConfig::load(&path).unwrap();
    assert_eq!(loaded.role, Role::Receiver);
    assert_eq!(loaded.target_length, 32);
    assert_eq!(loaded.receive_timeout(), Duration::from_secs(2));
}
