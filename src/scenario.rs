//! # Scenario Identification
//!
//! Recovers the structured scenario key `(mode, protocol, N, repetition)` from
//! a file path or a free-text label. Test runs are laid out by naming
//! convention, for example:
//!
//! ```text
//! paper_run_auth/mqtt/N100/rep2/metrics_r1_mqtt_id7.csv
//! ```
//!
//! Each field has its own detector. Detectors scan the lower-cased input and
//! take the first token-bounded match; a field without a match stays
//! `Unknown`/`None`. Fields are never inferred from each other and
//! identification never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Authentication mode of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Open,
    Auth,
    Unknown,
}

/// Application protocol exercised by a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Mqtt,
    Coap,
    Unknown,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Open => "open",
            Mode::Auth => "auth",
            Mode::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Mode::Unknown
    }

    fn from_token(token: &str) -> Self {
        match token {
            "open" => Mode::Open,
            "auth" => Mode::Auth,
            _ => Mode::Unknown,
        }
    }
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Mqtt => "mqtt",
            Protocol::Coap => "coap",
            Protocol::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Protocol::Unknown
    }

    fn from_token(token: &str) -> Self {
        match token {
            "http" => Protocol::Http,
            "mqtt" => Protocol::Mqtt,
            "coap" => Protocol::Coap,
            _ => Protocol::Unknown,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured identity of a test scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioKey {
    pub mode: Mode,
    pub protocol: Protocol,
    pub client_count: Option<u32>,
    pub repetition: Option<u32>,
}

impl ScenarioKey {
    /// True when every field was recovered from the input
    pub fn is_fully_resolved(&self) -> bool {
        self.mode.is_known()
            && self.protocol.is_known()
            && self.client_count.is_some()
            && self.repetition.is_some()
    }

    /// Human-readable row label, e.g. `auth_mqtt_n100_rep2_client`
    ///
    /// Missing counts are rendered as `N?` and `rep?` so that unlabeled
    /// files remain distinguishable in the per-file latency table.
    pub fn label(&self, stem: &str) -> String {
        let n = self
            .client_count
            .map_or_else(|| "N?".to_string(), |n| format!("n{}", n));
        let rep = self
            .repetition
            .map_or_else(|| "rep?".to_string(), |r| format!("rep{}", r));
        format!(
            "{}_{}_{}_{}_{}",
            self.mode,
            self.protocol,
            n,
            rep,
            stem.to_lowercase()
        )
    }
}

/// One field detector in the ordered detector list
enum Field {
    Mode,
    Protocol,
    ClientCount,
    Repetition,
}

const LEAD: &str = r"(?:^|[\s/\\_.\-])";
const TRAIL: &str = r"(?:$|[\s/\\_.\-])";

fn bounded(token: &str) -> Regex {
    Regex::new(&format!("{}{}{}", LEAD, token, TRAIL)).expect("scenario detector regex is valid")
}

/// Detectors in priority order; identification walks this list once.
static DETECTORS: Lazy<Vec<(Field, Regex)>> = Lazy::new(|| {
    vec![
        (Field::Mode, bounded("(open|auth)")),
        (Field::Protocol, bounded("(http|mqtt|coap)")),
        (Field::ClientCount, bounded(r"n(\d+)")),
        (Field::Repetition, bounded(r"rep(\d+)")),
    ]
});

static PAYLOAD_DETECTOR: Lazy<Regex> = Lazy::new(|| bounded(r"(?:payload|pl|p)(\d+)"));

/// Identify the scenario described by a path or label
///
/// ## Examples
///
/// ```rust
/// use protobench_metrics::scenario::{identify, Mode, Protocol};
///
/// let key = identify(".../paper_run_auth/mqtt/N100/rep2/client.log");
/// assert_eq!(key.mode, Mode::Auth);
/// assert_eq!(key.protocol, Protocol::Mqtt);
/// assert_eq!(key.client_count, Some(100));
/// assert_eq!(key.repetition, Some(2));
/// ```
pub fn identify(path_or_label: &str) -> ScenarioKey {
    let text = path_or_label.to_lowercase();
    let mut key = ScenarioKey {
        mode: Mode::Unknown,
        protocol: Protocol::Unknown,
        client_count: None,
        repetition: None,
    };

    for (field, detector) in DETECTORS.iter() {
        let Some(captured) = first_capture(detector, &text) else {
            continue;
        };
        match field {
            Field::Mode => key.mode = Mode::from_token(captured),
            Field::Protocol => key.protocol = Protocol::from_token(captured),
            Field::ClientCount => key.client_count = positive(captured),
            Field::Repetition => key.repetition = positive(captured),
        }
    }

    key
}

/// Identify the scenario of a filesystem path
pub fn identify_path(path: &Path) -> ScenarioKey {
    identify(&path.to_string_lossy())
}

/// Payload size token (`payload64`, `pl64`, `p64`) from a capture path
pub fn payload_size(path_or_label: &str) -> Option<u32> {
    let text = path_or_label.to_lowercase();
    first_capture(&PAYLOAD_DETECTOR, &text).and_then(positive)
}

/// First capture group of the leftmost match
fn first_capture<'t>(detector: &Regex, text: &'t str) -> Option<&'t str> {
    detector
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn positive(digits: &str) -> Option<u32> {
    digits.parse::<u32>().ok().filter(|&n| n > 0)
}
