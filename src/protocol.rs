//! Wire formats spoken by the node.
//!
//! - **RS-485 (master link)**: one semicolon-delimited `key:value` line per
//!   record, e.g. `ID:firenode;T:24.50;T0:24.50;H:51.20;P:1009.87;MQ2:312;MQ7:4;SC:0;LVL:0`.
//!   Commands from the master use the same field syntax
//!   (`CMD:SETID;ID:kiln-2`, optionally addressed with `TO:<id>`).
//! - **Console**: newline-delimited JSON ([`DeviceMessage`]) for bench
//!   debugging. Uses `heapless` types for no_std/no-alloc operation.
use core::fmt::Write;

use heapless::{String, Vec};
use serde::Serialize;

use crate::identity::DeviceId;
use crate::node::{NodeConfig, Snapshot};

/// Maximum length of one RS-485 record, newline included
pub const MAX_RECORD_LEN: usize = 192;

/// Buffer for one RS-485 record
pub type RecordLine = String<MAX_RECORD_LEN>;

/// At most this many `key:value` fields are read from one line
pub const MAX_FIELDS: usize = 5;

/// Placeholder written for a channel without data
pub const MISSING: &str = "-";

/// Record field separator
pub const FIELD_SEP: char = ';';

/// Key/value separator within a field
pub const KV_SEP: char = ':';

// ── Status record ───────────────────────────────────────────────────

fn write_value(out: &mut RecordLine, value: Option<f32>, decimals: usize) -> core::fmt::Result {
    match value {
        Some(v) => write!(out, "{:.*}", decimals, v),
        None => out.write_str(MISSING),
    }
}

/// Format the periodic status record for `snapshot`.
///
/// Temperatures, humidity and pressure carry two decimals; gas readings are
/// rounded to whole ADC counts. Fails only if the record outgrows the buffer.
pub fn format_status(id: &str, snapshot: &Snapshot) -> Result<RecordLine, core::fmt::Error> {
    let mut out = RecordLine::new();

    write!(out, "ID:{}", id)?;

    out.write_str(";T:")?;
    write_value(&mut out, snapshot.avg_temperature, 2)?;

    for (i, probe) in snapshot.probes.iter().enumerate() {
        write!(out, ";T{}:", i)?;
        write_value(&mut out, *probe, 2)?;
    }

    out.write_str(";H:")?;
    write_value(&mut out, snapshot.humidity, 2)?;
    out.write_str(";P:")?;
    write_value(&mut out, snapshot.pressure, 2)?;
    out.write_str(";MQ2:")?;
    write_value(&mut out, snapshot.gas, 0)?;
    out.write_str(";MQ7:")?;
    write_value(&mut out, snapshot.co, 0)?;

    write!(
        out,
        ";SC:{};LVL:{}\n",
        snapshot.assessment.score,
        snapshot.assessment.level.code()
    )?;

    Ok(out)
}

/// Reply kind for [`format_reply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nak,
}

impl Reply {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reply::Ack => "ACK",
            Reply::Nak => "NAK",
        }
    }
}

/// Format a command reply record (`ID:<id>;ACK:<what>` or `ID:<id>;NAK:<what>`).
pub fn format_reply(id: &str, reply: Reply, what: &str) -> Result<RecordLine, core::fmt::Error> {
    let mut out = RecordLine::new();
    write!(out, "ID:{};{}:{}\n", id, reply.as_str(), what)?;
    Ok(out)
}

// ── Field parsing ───────────────────────────────────────────────────

/// Split a record into `(key, value)` pairs.
///
/// Fields are separated by `;`, keys from values by the first `:`. Empty
/// fields are skipped, a field without `:` gets an empty value, and anything
/// past [`MAX_FIELDS`] is dropped.
pub fn parse_fields(line: &str) -> Vec<(&str, &str), MAX_FIELDS> {
    let mut fields = Vec::new();

    for field in line.split(FIELD_SEP) {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let pair = match field.split_once(KV_SEP) {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (field, ""),
        };
        if fields.push(pair).is_err() {
            break;
        }
    }

    fields
}

// ── Master commands ─────────────────────────────────────────────────

/// Commands sent from the RS-485 master to a node.
///
/// Parsed from [`RawCommand`] in `comm::parse_command()`.
#[derive(Debug, PartialEq)]
pub enum HostCommand {
    /// Reply with a status record now (`CMD:STATUS`)
    GetStatus,
    /// Liveness check (`CMD:PING`)
    Ping,
    /// Persist a new identity (`CMD:SETID;ID:<new>`)
    SetId { id: DeviceId },
    /// Erase the persisted identity (`CMD:CLEARID`)
    ClearId,
}

/// Command fields as they appear on the wire, before validation.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct RawCommand<'a> {
    pub cmd: Option<&'a str>,
    /// Target node; `None` means every node
    pub to: Option<&'a str>,
    pub id: Option<&'a str>,
}

impl<'a> RawCommand<'a> {
    pub fn from_line(line: &'a str) -> Self {
        let mut raw = Self::default();
        for (key, value) in parse_fields(line) {
            match key {
                "CMD" => raw.cmd = Some(value),
                "TO" => raw.to = Some(value),
                "ID" => raw.id = Some(value),
                _ => log::debug!("Ignoring command field '{}'", key),
            }
        }
        raw
    }
}

// ── Console messages ────────────────────────────────────────────────

/// Messages written to the console as NDJSON
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Emitted once after startup
    #[serde(rename = "boot")]
    Boot {
        id: &'a str,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
        /// Number of DS18B20 probes discovered
        probes: u8,
        config: &'a NodeConfig,
    },
    /// Smoothed readings and assessment for one tick
    #[serde(rename = "reading")]
    Reading {
        id: &'a str,
        snapshot: &'a Snapshot,
        /// Uptime in milliseconds when sampled
        ts: u32,
    },
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::{Assessment, HazardLevel};
    use crate::node::ProbeValues;

    fn snapshot() -> Snapshot {
        let mut probes = ProbeValues::new();
        let _ = probes.push(Some(24.5));
        let _ = probes.push(None);
        Snapshot {
            avg_temperature: Some(24.5),
            probes,
            humidity: Some(51.2),
            pressure: Some(1009.87),
            gas: Some(312.4),
            co: Some(4.0),
            assessment: Assessment {
                score: 0,
                level: HazardLevel::Normal,
            },
        }
    }

    // ── Status record ───────────────────────────────────────────────

    #[test]
    fn status_record_fields_in_order() {
        let line = format_status("firenode", &snapshot()).unwrap();
        assert_eq!(
            line.as_str(),
            "ID:firenode;T:24.50;T0:24.50;T1:-;H:51.20;P:1009.87;MQ2:312;MQ7:4;SC:0;LVL:0\n"
        );
    }

    #[test]
    fn status_record_without_data() {
        let snap = Snapshot {
            avg_temperature: None,
            probes: ProbeValues::new(),
            humidity: None,
            pressure: None,
            gas: None,
            co: None,
            assessment: Assessment {
                score: 0,
                level: HazardLevel::Normal,
            },
        };
        let line = format_status("n1", &snap).unwrap();
        assert_eq!(line.as_str(), "ID:n1;T:-;H:-;P:-;MQ2:-;MQ7:-;SC:0;LVL:0\n");
    }

    #[test]
    fn status_record_reports_level_code() {
        let mut snap = snapshot();
        snap.assessment = Assessment {
            score: 7,
            level: HazardLevel::Fire,
        };
        let line = format_status("n1", &snap).unwrap();
        assert!(line.ends_with(";SC:7;LVL:3\n"));
    }

    #[test]
    fn status_record_parses_back_into_fields() {
        let line = format_status("firenode", &snapshot()).unwrap();
        let fields = parse_fields(line.trim_end());
        assert_eq!(fields[0], ("ID", "firenode"));
        assert_eq!(fields[1], ("T", "24.50"));
        assert_eq!(fields.len(), MAX_FIELDS);
    }

    #[test]
    fn reply_records() {
        let line = format_reply("kiln-2", Reply::Ack, "SETID").unwrap();
        assert_eq!(line.as_str(), "ID:kiln-2;ACK:SETID\n");
        let line = format_reply("kiln-2", Reply::Nak, "SETID").unwrap();
        assert_eq!(line.as_str(), "ID:kiln-2;NAK:SETID\n");
    }

    // ── Field parsing ───────────────────────────────────────────────

    #[test]
    fn parse_simple_fields() {
        let fields = parse_fields("CMD:SETID;ID:kiln-2");
        assert_eq!(fields.as_slice(), &[("CMD", "SETID"), ("ID", "kiln-2")]);
    }

    #[test]
    fn parse_skips_empty_fields_and_trims() {
        let fields = parse_fields(" CMD : PING ;; ;TO:n1;");
        assert_eq!(fields.as_slice(), &[("CMD", "PING"), ("TO", "n1")]);
    }

    #[test]
    fn parse_value_keeps_later_colons() {
        let fields = parse_fields("ID:a:b");
        assert_eq!(fields.as_slice(), &[("ID", "a:b")]);
    }

    #[test]
    fn parse_field_without_separator() {
        let fields = parse_fields("PING");
        assert_eq!(fields.as_slice(), &[("PING", "")]);
    }

    #[test]
    fn parse_caps_field_count() {
        let fields = parse_fields("A:1;B:2;C:3;D:4;E:5;F:6;G:7");
        assert_eq!(fields.len(), MAX_FIELDS);
        assert_eq!(fields[4], ("E", "5"));
    }

    #[test]
    fn raw_command_collects_known_keys() {
        let raw = RawCommand::from_line("TO:n1;CMD:SETID;ID:n2;XYZ:1");
        assert_eq!(
            raw,
            RawCommand {
                cmd: Some("SETID"),
                to: Some("n1"),
                id: Some("n2"),
            }
        );
    }

    // ── DeviceMessage serialization ─────────────────────────────────

    #[test]
    fn serialize_reading_message() {
        let mut snap = snapshot();
        snap.assessment = Assessment {
            score: 5,
            level: HazardLevel::Fire,
        };
        let msg = DeviceMessage::Reading {
            id: "firenode",
            snapshot: &snap,
            ts: 1000,
        };
        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"reading""#));
        assert!(json.contains(r#""id":"firenode""#));
        assert!(json.contains(r#""level":"fire""#));
        assert!(json.contains(r#""score":5"#));
        assert!(json.contains(r#""ts":1000"#));
    }

    #[test]
    fn serialize_missing_values_as_null() {
        let snap = snapshot();
        let msg = DeviceMessage::Reading {
            id: "firenode",
            snapshot: &snap,
            ts: 0,
        };
        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains("null"));
    }

    #[test]
    fn serialize_boot_message() {
        let config = NodeConfig::default();
        let msg = DeviceMessage::Boot {
            id: "firenode",
            board: "test_board",
            version: "0.1.0",
            probes: 2,
            config: &config,
        };
        let mut buf = [0u8; MAX_MSG_LEN];
        let len = serde_json_core::to_slice(&msg, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""type":"boot""#));
        assert!(json.contains(r#""board":"test_board""#));
        assert!(json.contains(r#""probes":2"#));
        assert!(json.contains(r#""temperature":25"#));
    }

    // ── Version constant ────────────────────────────────────────────

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "VERSION should be semver (major.minor.patch)"
        );
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
