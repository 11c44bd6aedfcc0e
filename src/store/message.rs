//! Message records held by the store
//!
//! A [`Message`] is created once by the store and never changed afterwards. The raw
//! payload bytes are authoritative; every text form (preview, pretty print, log line,
//! export row) is derived from them on demand.

use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

use super::error::DeliveryError;

/// Monotonic identity assigned by the store at insert time
pub type SequenceId = u64;

/// Maximum payload length shown in a table cell
pub const PREVIEW_LEN: usize = 120;

/// Width of the separator line in [`Message::detail`]
const DETAIL_RULE_WIDTH: usize = 60;

/// MQTT delivery guarantee level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = DeliveryError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(DeliveryError::InvalidQos(other)),
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// One received message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    sequence_id: SequenceId,
    received_at: DateTime<Local>,
    topic: String,
    payload: Vec<u8>,
    qos: Qos,
    retain: bool,
}

impl Message {
    pub(crate) fn new(
        sequence_id: SequenceId,
        received_at: DateTime<Local>,
        topic: String,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    ) -> Self {
        Self {
            sequence_id,
            received_at,
            topic,
            payload,
            qos,
            retain,
        }
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Payload decoded as UTF-8, invalid sequences replaced
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Payload pretty-printed as JSON when it parses, plain text otherwise
    pub fn pretty_payload(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.payload)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| self.payload_text().into_owned())
    }

    /// Payload shortened for a single table cell
    pub fn preview(&self) -> String {
        let text = self.payload_text();
        if text.chars().count() <= PREVIEW_LEN {
            return text.into_owned();
        }
        let mut short: String = text.chars().take(PREVIEW_LEN - 3).collect();
        short.push('…');
        short
    }

    /// Wall clock time as `HH:MM:SS.mmm`
    pub fn timestamp_label(&self) -> String {
        self.received_at.format("%H:%M:%S%.3f").to_string()
    }

    /// ISO-8601 timestamp with millisecond precision
    pub fn timestamp_iso(&self) -> String {
        self.received_at
            .to_rfc3339_opts(SecondsFormat::Millis, false)
    }

    pub fn retain_marker(&self) -> &'static str {
        if self.retain {
            "R"
        } else {
            ""
        }
    }

    /// Multi-line description used by detail views
    pub fn detail(&self) -> String {
        format!(
            "Topic:   {}\nTime:    {}\nQoS:     {}    Retain: {}\n{}\n{}",
            self.topic,
            self.timestamp_iso(),
            self.qos,
            if self.retain { "Yes" } else { "No" },
            "─".repeat(DETAIL_RULE_WIDTH),
            self.pretty_payload()
        )
    }

    /// Plain-text record for an append-only message log
    pub fn log_line(&self) -> LogLine {
        LogLine {
            timestamp: self.timestamp_iso(),
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
            payload: self.payload_text().into_owned(),
        }
    }

    /// Tabular record handed to export writers
    pub fn export_row(&self) -> ExportRow {
        ExportRow {
            timestamp: self.timestamp_iso(),
            topic: self.topic.clone(),
            payload: self.payload_text().into_owned(),
            qos: self.qos.level(),
            retain: if self.retain { "Yes" } else { "No" },
        }
    }
}

/// Line handed to the message log sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: String,
    pub qos: Qos,
    pub retain: bool,
    pub topic: String,
    pub payload: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}  QoS={}  {}  {}  {}",
            self.timestamp,
            self.qos,
            if self.retain { "R" } else { " " },
            self.topic,
            self.payload
        )
    }
}

/// Row handed to tabular exporters, columns in display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub timestamp: String,
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: &'static str,
}

impl ExportRow {
    pub const HEADER: [&'static str; 5] = ["Timestamp", "Topic", "Payload", "QoS", "Retain"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(payload: &[u8], retain: bool) -> Message {
        let received_at = Local.with_ymd_and_hms(2024, 5, 17, 8, 30, 12).unwrap()
            + chrono::Duration::milliseconds(45);
        Message::new(
            7,
            received_at,
            "sensors/temp".to_string(),
            payload.to_vec(),
            Qos::AtLeastOnce,
            retain,
        )
    }

    #[test]
    fn qos_levels_outside_range_are_rejected() {
        assert_eq!(Qos::try_from(2), Ok(Qos::ExactlyOnce));
        assert_eq!(Qos::try_from(3), Err(DeliveryError::InvalidQos(3)));
    }

    #[test]
    fn timestamp_label_has_millisecond_precision() {
        assert_eq!(message(b"1", false).timestamp_label(), "08:30:12.045");
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = "x".repeat(200);
        let preview = message(long.as_bytes(), false).preview();
        assert_eq!(preview.chars().count(), PREVIEW_LEN - 2);
        assert!(preview.ends_with('…'));

        assert_eq!(message(b"short", false).preview(), "short");
    }

    #[test]
    fn pretty_payload_formats_json_and_falls_back_to_text() {
        let json = message(br#"{"temp":23.5}"#, false).pretty_payload();
        assert_eq!(json, "{\n  \"temp\": 23.5\n}");

        let text = message(b"not json", false).pretty_payload();
        assert_eq!(text, "not json");
    }

    #[test]
    fn invalid_utf8_payload_is_decoded_lossily() {
        let msg = message(&[0x66, 0xff, 0x6f], false);
        assert_eq!(msg.payload_text(), "f\u{fffd}o");
        assert_eq!(msg.payload(), &[0x66, 0xff, 0x6f]);
    }

    #[test]
    fn log_line_marks_retained_messages() {
        let line = message(b"23.5", true).log_line().to_string();
        assert!(line.ends_with("QoS=1  R  sensors/temp  23.5"), "{line}");

        let line = message(b"23.5", false).log_line().to_string();
        assert!(line.ends_with("QoS=1     sensors/temp  23.5"), "{line}");
    }

    #[test]
    fn export_row_uses_yes_no_for_retain() {
        let row = message(b"on", true).export_row();
        assert_eq!(row.topic, "sensors/temp");
        assert_eq!(row.payload, "on");
        assert_eq!(row.qos, 1);
        assert_eq!(row.retain, "Yes");
    }

    #[test]
    fn detail_contains_header_and_payload() {
        let detail = message(b"[1,2]", false).detail();
        assert!(detail.starts_with("Topic:   sensors/temp\n"));
        assert!(detail.contains("QoS:     1    Retain: No"));
        assert!(detail.ends_with("[\n  1,\n  2\n]"));
    }
}
