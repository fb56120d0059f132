//! Classification of SDS payloads.
//!
//! Payloads carry no reliable type field, so the category is inferred by an
//! ordered table of rules ([`RULES`]). The first rule whose predicate holds
//! decides the outcome. Several payload shapes overlap by length, so the order
//! of the table is part of the contract.

use log::debug;

use crate::hex;
use crate::lip::{self, CompactCalibration, PositionFix};
use crate::reassembler::SdsRecord;

/// Payloads that acknowledge an earlier SDS.
pub const ACK_PAYLOADS: [&str; 2] = ["8200010D06", "41434B"];
/// Header discriminator of a status message.
pub const STATUS_DISCRIMINATOR: &str = "2";
/// Prefix of a text SDS (protocol id, flags, message reference, coding).
pub const TEXT_PREFIX: &str = "8200010D";
/// Number of leading payload bytes skipped before text content.
pub const TEXT_HEADER_BYTES: usize = 4;
/// Minimum payload length in hex characters considered for positioning.
pub const MIN_POSITION_HEX_LEN: usize = 18;
/// Minimum payload length in hex characters that also carries long-LIP fields.
pub const MIN_LONG_HEX_LEN: usize = 40;

/// Tunables for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Printable share above which an unprefixed payload is read as text.
    pub text_threshold: f64,
    pub compact: CompactCalibration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            text_threshold: hex::DEFAULT_TEXT_THRESHOLD,
            compact: CompactCalibration::default(),
        }
    }
}

/// Positioning outcome of one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    /// The fix that decides retry handling. `None` if nothing was decodable.
    pub primary: Option<PositionFix>,
    /// Fixes from additional layouts decoded off the same payload.
    pub supplementary: Vec<PositionFix>,
}

impl PositionReport {
    /// Returns `true` if the primary fix carries both coordinates.
    pub fn is_complete(&self) -> bool {
        self.primary.as_ref().is_some_and(PositionFix::is_complete)
    }
}

/// A classified SDS payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Acknowledgement of an SDS we sent.
    Ack,
    /// Status message. The code is the payload, upper-cased.
    Status { code: String },
    /// Free text.
    Text { text: String },
    /// One of the positioning layouts.
    Position(PositionReport),
    /// Nothing matched.
    Unrecognized,
}

impl Message {
    /// Returns `true` if the sender expects an acknowledgement for this message.
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Message::Ack)
    }
}

/// Input handed to each classification rule.
pub struct Payload<'a> {
    /// Upper-cased hex payload.
    pub hex: &'a str,
    /// Header discriminator, if present.
    pub discriminator: Option<&'a str>,
    /// Sender ISSI, or an empty string when the header had none.
    pub source: &'a str,
}

impl Payload<'_> {
    /// Hex after the fixed text header, or an empty string.
    fn text_body(&self) -> &str {
        self.hex.get(TEXT_HEADER_BYTES * 2..).unwrap_or("")
    }
}

/// One entry of the classification table.
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&Payload<'_>, &ClassifierConfig) -> bool,
    pub decode: fn(&Payload<'_>, &ClassifierConfig) -> Message,
}

/// Classification rules in priority order.
pub const RULES: &[Rule] = &[
    Rule {
        name: "ack",
        applies: is_ack,
        decode: decode_ack,
    },
    Rule {
        name: "status",
        applies: is_status,
        decode: decode_status,
    },
    Rule {
        name: "text",
        applies: has_text_prefix,
        decode: decode_text,
    },
    Rule {
        name: "likely-text",
        applies: is_likely_text,
        decode: decode_text,
    },
    Rule {
        name: "compact",
        applies: is_compact,
        decode: decode_compact,
    },
    Rule {
        name: "position",
        applies: is_position,
        decode: decode_position,
    },
    Rule {
        name: "short",
        applies: has_text_body,
        decode: decode_text,
    },
];

fn is_ack(p: &Payload<'_>, _: &ClassifierConfig) -> bool {
    ACK_PAYLOADS.contains(&p.hex)
}

fn is_status(p: &Payload<'_>, _: &ClassifierConfig) -> bool {
    p.discriminator == Some(STATUS_DISCRIMINATOR)
}

fn has_text_prefix(p: &Payload<'_>, _: &ClassifierConfig) -> bool {
    p.hex.starts_with(TEXT_PREFIX)
}

// Guards against reading free text without the usual prefix as a position.
// Short binary payloads can pass by coincidence.
fn is_likely_text(p: &Payload<'_>, cfg: &ClassifierConfig) -> bool {
    hex::is_likely_text(p.text_body(), cfg.text_threshold)
}

fn is_compact(p: &Payload<'_>, _: &ClassifierConfig) -> bool {
    p.hex.len() == lip::COMPACT_HEX_LEN && p.hex.starts_with(lip::COMPACT_PREFIX)
}

fn is_position(p: &Payload<'_>, _: &ClassifierConfig) -> bool {
    p.hex.len() >= MIN_POSITION_HEX_LEN
}

fn has_text_body(p: &Payload<'_>, _: &ClassifierConfig) -> bool {
    !p.text_body().is_empty()
}

fn decode_ack(_: &Payload<'_>, _: &ClassifierConfig) -> Message {
    Message::Ack
}

fn decode_status(p: &Payload<'_>, _: &ClassifierConfig) -> Message {
    Message::Status {
        code: p.hex.to_string(),
    }
}

fn decode_compact(p: &Payload<'_>, cfg: &ClassifierConfig) -> Message {
    Message::Position(PositionReport {
        primary: lip::decode_compact(p.hex, p.source, &cfg.compact),
        supplementary: Vec::new(),
    })
}

fn decode_text(p: &Payload<'_>, _: &ClassifierConfig) -> Message {
    Message::Text {
        text: hex::hex_to_text(p.text_body()),
    }
}

fn decode_position(p: &Payload<'_>, _: &ClassifierConfig) -> Message {
    let mut supplementary = Vec::new();
    if p.hex.len() >= MIN_LONG_HEX_LEN {
        supplementary.extend(lip::decode_long(p.hex, p.source));
    }
    if lip::ROUTE_PREFIXES.iter().any(|prefix| p.hex.starts_with(prefix)) {
        supplementary.extend(lip::decode_route(p.hex, p.source));
    }
    Message::Position(PositionReport {
        primary: lip::decode_standard(p.hex, p.source),
        supplementary,
    })
}

/// Classify a payload against [`RULES`].
pub fn classify_payload(payload: &Payload<'_>, config: &ClassifierConfig) -> Message {
    for rule in RULES {
        if (rule.applies)(payload, config) {
            debug!("payload {} matched rule {}", payload.hex, rule.name);
            return (rule.decode)(payload, config);
        }
    }
    Message::Unrecognized
}

/// Classify a complete SDS record.
pub fn classify(record: &SdsRecord, config: &ClassifierConfig) -> Message {
    let hex = record.payload.to_ascii_uppercase();
    let payload = Payload {
        hex: &hex,
        discriminator: record.header.discriminator.as_deref(),
        source: record.header.sender.as_deref().unwrap_or(""),
    };
    classify_payload(&payload, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lip::Encoding;
    use crate::reassembler::SdsHeader;

    fn record(discriminator: &str, payload: &str) -> SdsRecord {
        let raw_header = format!("+CTSDSR: 12,1234567,{discriminator},7654321,0,64");
        SdsRecord {
            header: SdsHeader::parse(&raw_header),
            raw_header,
            payload: payload.to_string(),
        }
    }

    fn run(discriminator: &str, payload: &str) -> Message {
        classify(&record(discriminator, payload), &ClassifierConfig::default())
    }

    #[test]
    fn test_ack_payloads() {
        assert_eq!(run("0", "8200010D06"), Message::Ack);
        assert_eq!(run("0", "41434b"), Message::Ack);
        // ACK wins even over the status discriminator.
        assert_eq!(run("2", "41434B"), Message::Ack);
        assert!(!Message::Ack.expects_ack());
    }

    #[test]
    fn test_status() {
        assert_eq!(
            run("2", "0001"),
            Message::Status {
                code: "0001".to_string()
            }
        );
        assert_eq!(
            run("2", "8002abcd"),
            Message::Status {
                code: "8002ABCD".to_string()
            }
        );
    }

    #[test]
    fn test_prefixed_text() {
        assert_eq!(
            run("0", "8200010D48656C6C6F"),
            Message::Text {
                text: "Hello".to_string()
            }
        );
    }

    #[test]
    fn test_unprefixed_text_heuristic() {
        // Arbitrary 4-byte header followed by "Status OK".
        assert_eq!(
            run("0", "0102030453746174757320 4F4B".replace(' ', "").as_str()),
            Message::Text {
                text: "Status OK".to_string()
            }
        );
    }

    #[test]
    fn test_compact_position() {
        let Message::Position(report) = run("0", "0A006B20007010001E5A05") else {
            panic!("expected position");
        };
        let fix = report.primary.unwrap();
        assert_eq!(fix.encoding, Encoding::Compact);
        assert_eq!(fix.source, "1234567");
        assert!(report.supplementary.is_empty());
    }

    #[test]
    fn test_standard_position() {
        let Message::Position(report) = run("0", "0300000000486421031A8BCC007D000E010A") else {
            panic!("expected position");
        };
        assert!(report.is_complete());
        assert_eq!(report.primary.unwrap().encoding, Encoding::Standard);
        assert!(report.supplementary.is_empty());
    }

    #[test]
    fn test_partial_position() {
        let Message::Position(report) = run("0", "0000000000486421031A8BCC") else {
            panic!("expected position");
        };
        assert!(!report.is_complete());
        assert!(report.primary.is_some());
    }

    #[test]
    fn test_long_position_adds_altitude_fix() {
        let Message::Position(report) = run("0", "0300000000486421031A8BCC0023000E010A0000") else {
            panic!("expected position");
        };
        assert_eq!(report.supplementary.len(), 1);
        assert_eq!(report.supplementary[0].encoding, Encoding::Long);
        assert_eq!(report.supplementary[0].altitude, Some(35));
    }

    #[test]
    fn test_route_prefix_adds_route_fix() {
        let Message::Position(report) = run("0", "010000000000486421031A8BCC00") else {
            panic!("expected position");
        };
        assert_eq!(report.supplementary.len(), 1);
        let route = &report.supplementary[0];
        assert_eq!(route.encoding, Encoding::RouteReport);
        assert!((route.latitude - 52.520008).abs() < 1e-6);
    }

    #[test]
    fn test_short_payload_never_decodes_position() {
        for payload in ["", "00", "0A00", "00000000", "0000000000", "0A006B2000701000"] {
            let message = run("0", payload);
            assert!(
                !matches!(message, Message::Position(_)),
                "{payload} classified as {message:?}"
            );
        }
    }

    #[test]
    fn test_short_payload_tail_is_text() {
        assert_eq!(
            run("0", "0000000001"),
            Message::Text {
                text: "\u{1}".to_string()
            }
        );
        assert_eq!(run("0", "00000000"), Message::Unrecognized);
        assert!(Message::Unrecognized.expects_ack());
    }

    #[test]
    fn test_threshold_is_configurable() {
        let strict = ClassifierConfig {
            text_threshold: 1.0,
            ..ClassifierConfig::default()
        };
        // 10 of 11 bytes printable: text by default, not under a strict threshold.
        let payload = "010203044142434445464748494A00";
        assert!(matches!(run("0", payload), Message::Text { .. }));
        let message = classify(&record("0", payload), &strict);
        assert!(matches!(message, Message::Position(_)));
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            ["ack", "status", "text", "likely-text", "compact", "position", "short"]
        );
    }
}
