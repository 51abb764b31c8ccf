//! Communication layer: RS-485 master link and console NDJSON.
//!
//! The node owns one half-duplex RS-485 transceiver (MAX485 style, separate
//! DE and RE pins). It stays in receive mode except while a record is being
//! written, so the master can address commands to it between reports.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_io::{Read, ReadReady, Write};
use embedded_storage::Storage;
use thiserror::Error;

use crate::identity::{DeviceId, Identity};
use crate::node::Snapshot;
use crate::protocol::{
    format_reply, format_status, DeviceMessage, HostCommand, RawCommand, RecordLine, Reply,
    MAX_RECORD_LEN,
};

/// RS-485 baud rate
pub const RS485_BAUD: u32 = 9600;

/// Settling time after flipping the transceiver direction
pub const TURNAROUND_US: u32 = 10;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

// ── Commands ───────────────────────────────────────────────────────────

/// Parse a command line from the master.
///
/// Returns `None` for blank lines, unknown commands, malformed arguments,
/// and commands addressed (`TO:`) to a different node.
pub fn parse_command(data: &[u8], own_id: &str) -> Option<HostCommand> {
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let line = core::str::from_utf8(trimmed).ok()?;
    let raw = RawCommand::from_line(line);

    if let Some(to) = raw.to {
        if to != own_id {
            return None;
        }
    }

    match raw.cmd? {
        "STATUS" => Some(HostCommand::GetStatus),
        "PING" => Some(HostCommand::Ping),
        "CLEARID" => Some(HostCommand::ClearId),
        "SETID" => {
            let requested = raw.id.filter(|id| !id.is_empty())?;
            let mut id = DeviceId::new();
            if id.push_str(requested).is_err() {
                log::warn!("SETID rejected: '{}' is too long", requested);
                return None;
            }
            Some(HostCommand::SetId { id })
        }
        other => {
            log::warn!("Unknown command '{}'", other);
            None
        }
    }
}

/// Apply a command and build the record to send back to the master.
pub fn handle_command<S>(
    cmd: &HostCommand,
    identity: &mut Identity<S>,
    snapshot: &Snapshot,
) -> Option<RecordLine>
where
    S: Storage,
    S::Error: core::fmt::Debug,
{
    let reply = match cmd {
        HostCommand::GetStatus => format_status(identity.id(), snapshot),
        HostCommand::Ping => format_reply(identity.id(), Reply::Ack, "PING"),
        HostCommand::SetId { id } => match identity.set(id) {
            Ok(()) => format_reply(identity.id(), Reply::Ack, "SETID"),
            Err(e) => {
                log::error!("Failed to persist identity: {:?}", e);
                format_reply(identity.id(), Reply::Nak, "SETID")
            }
        },
        HostCommand::ClearId => match identity.reset() {
            Ok(()) => format_reply(identity.id(), Reply::Ack, "CLEARID"),
            Err(e) => {
                log::error!("Failed to clear identity: {:?}", e);
                format_reply(identity.id(), Reply::Nak, "CLEARID")
            }
        },
    };

    reply.ok()
}

// ── Line reader ────────────────────────────────────────────────────────

/// Line reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
///
/// A line longer than the buffer is dropped as a whole: everything up to the
/// next line ending is discarded.
pub struct LineReader {
    buf: [u8; MAX_RECORD_LEN],
    pos: usize,
    discarding: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_RECORD_LEN],
            pos: 0,
            discarding: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        let end_of_line = byte == b'\n' || byte == b'\r';

        if self.discarding {
            if end_of_line {
                self.discarding = false;
            }
            return None;
        }

        if end_of_line {
            if self.pos > 0 {
                let line = &self.buf[..self.pos];
                self.pos = 0;
                Some(line)
            } else {
                None
            }
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow, drop the rest of this line
            self.pos = 0;
            self.discarding = true;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\t' | b'\r' | b'\n') {
        end -= 1;
    }
    &data[..end]
}

// ── RS-485 transceiver ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError<S, P> {
    #[error("serial error: {0:?}")]
    Serial(S),
    #[error("direction pin error: {0:?}")]
    Pin(P),
}

/// Half-duplex RS-485 link: a UART plus driver-enable (DE) and
/// receiver-enable (RE, active low) pins.
pub struct HalfDuplex<S, P, D> {
    serial: S,
    de: P,
    re: P,
    delay: D,
}

impl<S, P, D> HalfDuplex<S, P, D>
where
    S: Read + Write + ReadReady,
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(serial: S, de: P, re: P, delay: D) -> Self {
        Self {
            serial,
            de,
            re,
            delay,
        }
    }

    /// Put the transceiver in its idle (receive) state.
    pub fn begin(&mut self) -> Result<(), BusError<S::Error, P::Error>> {
        self.set_receive_mode()
    }

    fn set_transmit_mode(&mut self) -> Result<(), BusError<S::Error, P::Error>> {
        self.de.set_high().map_err(BusError::Pin)?;
        self.re.set_high().map_err(BusError::Pin)?;
        self.delay.delay_us(TURNAROUND_US);
        Ok(())
    }

    fn set_receive_mode(&mut self) -> Result<(), BusError<S::Error, P::Error>> {
        self.de.set_low().map_err(BusError::Pin)?;
        self.re.set_low().map_err(BusError::Pin)?;
        self.delay.delay_us(TURNAROUND_US);
        Ok(())
    }

    /// Drive the bus, write `data`, wait for it to drain, then release the
    /// bus again. The transceiver is returned to receive mode even if the
    /// write fails.
    pub fn send(&mut self, data: &[u8]) -> Result<(), BusError<S::Error, P::Error>> {
        self.set_transmit_mode()?;
        let written = self
            .serial
            .write_all(data)
            .and_then(|()| self.serial.flush())
            .map_err(BusError::Serial);
        self.set_receive_mode()?;
        written
    }

    /// Drain whatever the UART has buffered into `reader`, calling `on_line`
    /// for each completed line. Never blocks waiting for input.
    pub fn poll_lines(
        &mut self,
        reader: &mut LineReader,
        mut on_line: impl FnMut(&[u8]),
    ) -> Result<(), BusError<S::Error, P::Error>> {
        let mut chunk = [0u8; 32];
        while self.serial.read_ready().map_err(BusError::Serial)? {
            let n = self.serial.read(&mut chunk).map_err(BusError::Serial)?;
            if n == 0 {
                break;
            }
            for &byte in &chunk[..n] {
                if let Some(line) = reader.feed(byte) {
                    on_line(line);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use core::convert::Infallible;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::string::String;
    use std::vec::Vec;

    use crate::hazard::{Assessment, HazardLevel};
    use crate::identity::tests::MemStorage;
    use crate::identity::IdentityStore;
    use crate::node::ProbeValues;

    type EventLog = Rc<RefCell<Vec<String>>>;

    fn log_event(log: &EventLog, event: &str) {
        log.borrow_mut().push(event.into());
    }

    // ── Mocks ───────────────────────────────────────────────────────

    struct MockPin {
        name: &'static str,
        log: EventLog,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            log_event(&self.log, &format!("{}:0", self.name));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            log_event(&self.log, &format!("{}:1", self.name));
            Ok(())
        }
    }

    struct MockSerial {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        fail_writes: bool,
        log: EventLog,
    }

    impl embedded_io::ErrorType for MockSerial {
        type Error = embedded_io::ErrorKind;
    }

    impl Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let mut n = 0;
            while n < buf.len() {
                match self.rx.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl ReadReady for MockSerial {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.rx.is_empty())
        }
    }

    impl Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            if self.fail_writes {
                return Err(embedded_io::ErrorKind::Other);
            }
            log_event(&self.log, "write");
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            log_event(&self.log, "flush");
            Ok(())
        }
    }

    struct MockDelay;

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn link(rx: &[u8]) -> (HalfDuplex<MockSerial, MockPin, MockDelay>, EventLog) {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let serial = MockSerial {
            rx: rx.iter().copied().collect(),
            tx: Vec::new(),
            fail_writes: false,
            log: log.clone(),
        };
        let de = MockPin {
            name: "de",
            log: log.clone(),
        };
        let re = MockPin {
            name: "re",
            log: log.clone(),
        };
        (HalfDuplex::new(serial, de, re, MockDelay), log)
    }

    fn snapshot() -> Snapshot {
        let mut probes = ProbeValues::new();
        let _ = probes.push(Some(25.0));
        Snapshot {
            avg_temperature: Some(25.0),
            probes,
            humidity: Some(50.0),
            pressure: Some(1000.0),
            gas: Some(100.0),
            co: Some(0.0),
            assessment: Assessment {
                score: 0,
                level: HazardLevel::Normal,
            },
        }
    }

    fn identity() -> Identity<MemStorage> {
        Identity::load(IdentityStore::new(MemStorage::new(), 0))
    }

    // ── Command parsing ─────────────────────────────────────────────

    #[test]
    fn parse_status_command() {
        assert_eq!(
            parse_command(b"CMD:STATUS", "n1"),
            Some(HostCommand::GetStatus)
        );
    }

    #[test]
    fn parse_ping_with_trailing_newline() {
        assert_eq!(parse_command(b"CMD:PING\r\n", "n1"), Some(HostCommand::Ping));
    }

    #[test]
    fn parse_setid() {
        let cmd = parse_command(b"CMD:SETID;ID:kiln-2", "n1");
        let expected = DeviceId::try_from("kiln-2").unwrap();
        assert_eq!(cmd, Some(HostCommand::SetId { id: expected }));
    }

    #[test]
    fn parse_setid_requires_id() {
        assert_eq!(parse_command(b"CMD:SETID", "n1"), None);
        assert_eq!(parse_command(b"CMD:SETID;ID:", "n1"), None);
    }

    #[test]
    fn parse_setid_rejects_long_id() {
        assert_eq!(
            parse_command(b"CMD:SETID;ID:abcdefghijklmnopqrstuvwxyz", "n1"),
            None
        );
    }

    #[test]
    fn parse_clearid() {
        assert_eq!(parse_command(b"CMD:CLEARID", "n1"), Some(HostCommand::ClearId));
    }

    #[test]
    fn parse_addressed_to_us() {
        assert_eq!(
            parse_command(b"TO:n1;CMD:STATUS", "n1"),
            Some(HostCommand::GetStatus)
        );
    }

    #[test]
    fn parse_addressed_to_other_node_ignored() {
        assert_eq!(parse_command(b"TO:n2;CMD:STATUS", "n1"), None);
    }

    #[test]
    fn parse_rejects_unknown_and_blank() {
        assert_eq!(parse_command(b"CMD:REBOOT", "n1"), None);
        assert_eq!(parse_command(b"ID:n1", "n1"), None);
        assert_eq!(parse_command(b"  \r\n", "n1"), None);
        assert_eq!(parse_command(&[0xFF, 0xFE], "n1"), None);
    }

    // ── Command handling ────────────────────────────────────────────

    #[test]
    fn handle_status_replies_with_record() {
        let mut id = identity();
        let reply = handle_command(&HostCommand::GetStatus, &mut id, &snapshot()).unwrap();
        assert!(reply.starts_with("ID:firenode;T:25.00;"));
        assert!(reply.ends_with(";LVL:0\n"));
    }

    #[test]
    fn handle_ping() {
        let mut id = identity();
        let reply = handle_command(&HostCommand::Ping, &mut id, &snapshot()).unwrap();
        assert_eq!(reply.as_str(), "ID:firenode;ACK:PING\n");
    }

    #[test]
    fn handle_setid_then_clearid() {
        let mut id = identity();
        let cmd = HostCommand::SetId {
            id: DeviceId::try_from("kiln-2").unwrap(),
        };
        let reply = handle_command(&cmd, &mut id, &snapshot()).unwrap();
        assert_eq!(reply.as_str(), "ID:kiln-2;ACK:SETID\n");
        assert_eq!(id.id(), "kiln-2");

        let reply = handle_command(&HostCommand::ClearId, &mut id, &snapshot()).unwrap();
        assert_eq!(reply.as_str(), "ID:firenode;ACK:CLEARID\n");
    }

    #[test]
    fn handle_setid_storage_failure_naks() {
        let mut mem = MemStorage::new();
        mem.fail = true;
        let mut id = Identity::load(IdentityStore::new(mem, 0));
        let cmd = HostCommand::SetId {
            id: DeviceId::try_from("kiln-2").unwrap(),
        };
        let reply = handle_command(&cmd, &mut id, &snapshot()).unwrap();
        assert_eq!(reply.as_str(), "ID:firenode;NAK:SETID\n");
    }

    // ── Line reader ─────────────────────────────────────────────────

    #[test]
    fn line_reader_splits_on_newlines() {
        let mut reader = LineReader::new();
        let mut lines: Vec<Vec<u8>> = Vec::new();
        for &b in b"CMD:PING\r\nCMD:STATUS\n" {
            if let Some(line) = reader.feed(b) {
                lines.push(line.to_vec());
            }
        }
        assert_eq!(lines, [b"CMD:PING".to_vec(), b"CMD:STATUS".to_vec()]);
    }

    #[test]
    fn line_reader_discards_overflow() {
        let mut reader = LineReader::new();
        for _ in 0..=MAX_RECORD_LEN {
            assert!(reader.feed(b'x').is_none());
        }
        assert!(reader.feed(b'\n').is_none());

        // The overlong line was dropped; the next one comes through intact
        for &b in b"CMD:PING" {
            reader.feed(b);
        }
        assert_eq!(reader.feed(b'\n'), Some(&b"CMD:PING"[..]));
    }

    #[test]
    fn overlong_line_tail_is_not_yielded() {
        // The TO: field lands in the dropped head; the CMD: in the tail must
        // not surface as a line of its own.
        let mut line = std::vec::Vec::new();
        line.extend_from_slice(b"TO:other;PAD:");
        line.resize(MAX_RECORD_LEN + 5, b'x');
        line.extend_from_slice(b";CMD:CLEARID\n");

        let mut reader = LineReader::new();
        let mut lines: Vec<Vec<u8>> = Vec::new();
        for &b in &line {
            if let Some(l) = reader.feed(b) {
                lines.push(l.to_vec());
            }
        }
        assert!(lines.is_empty(), "yielded {:?}", lines);

        // A command after the overlong line is still accepted
        for &b in b"TO:me;CMD:PING\r\n" {
            if let Some(l) = reader.feed(b) {
                lines.push(l.to_vec());
            }
        }
        assert_eq!(lines, [b"TO:me;CMD:PING".to_vec()]);
        assert_eq!(parse_command(&lines[0], "me"), Some(HostCommand::Ping));
    }

    #[test]
    fn overlong_line_across_polls_is_dropped() {
        let mut long = std::vec::Vec::new();
        long.extend_from_slice(b"TO:other;");
        long.resize(MAX_RECORD_LEN + 40, b'x');
        long.extend_from_slice(b";CMD:CLEARID\nCMD:PING\n");

        let (mut bus, _log) = link(&long);
        let mut reader = LineReader::new();
        let mut cmds: Vec<HostCommand> = Vec::new();
        bus.poll_lines(&mut reader, |line| {
            if let Some(cmd) = parse_command(line, "me") {
                cmds.push(cmd);
            }
        })
        .unwrap();
        assert_eq!(cmds, [HostCommand::Ping]);
    }

    // ── RS-485 direction control ────────────────────────────────────

    #[test]
    fn begin_enters_receive_mode() {
        let (mut bus, log) = link(&[]);
        bus.begin().unwrap();
        assert_eq!(*log.borrow(), ["de:0", "re:0"]);
    }

    #[test]
    fn send_wraps_write_in_transmit_mode() {
        let (mut bus, log) = link(&[]);
        bus.send(b"ID:n1;ACK:PING\n").unwrap();
        assert_eq!(
            *log.borrow(),
            ["de:1", "re:1", "write", "flush", "de:0", "re:0"]
        );
        assert_eq!(bus.serial.tx, b"ID:n1;ACK:PING\n");
    }

    #[test]
    fn failed_write_still_releases_bus() {
        let (mut bus, log) = link(&[]);
        bus.serial.fail_writes = true;
        assert_eq!(
            bus.send(b"x"),
            Err(BusError::Serial(embedded_io::ErrorKind::Other))
        );
        assert_eq!(*log.borrow(), ["de:1", "re:1", "de:0", "re:0"]);
    }

    #[test]
    fn poll_collects_complete_lines() {
        let (mut bus, _log) = link(b"CMD:PING\nCMD:STA");
        let mut reader = LineReader::new();
        let mut lines: Vec<Vec<u8>> = Vec::new();

        bus.poll_lines(&mut reader, |line| lines.push(line.to_vec()))
            .unwrap();
        assert_eq!(lines, [b"CMD:PING".to_vec()]);

        // The partial command completes on a later poll
        bus.serial.rx.extend(b"TUS\n".iter().copied());
        bus.poll_lines(&mut reader, |line| lines.push(line.to_vec()))
            .unwrap();
        assert_eq!(lines, [b"CMD:PING".to_vec(), b"CMD:STATUS".to_vec()]);
    }

    // ── Serialization ───────────────────────────────────────────────

    #[test]
    fn serialize_message_appends_newline() {
        let snap = snapshot();
        let msg = DeviceMessage::Reading {
            id: "n1",
            snapshot: &snap,
            ts: 5,
        };
        let mut buf = [0u8; 512];
        let len = serialize_message(&msg, &mut buf).unwrap();
        assert_eq!(buf[len - 1], b'\n');
        assert_eq!(buf[0], b'{');
    }

    #[test]
    fn serialize_message_too_small_buffer() {
        let snap = snapshot();
        let msg = DeviceMessage::Reading {
            id: "n1",
            snapshot: &snap,
            ts: 5,
        };
        let mut buf = [0u8; 8];
        assert_eq!(serialize_message(&msg, &mut buf), None);
    }
}
