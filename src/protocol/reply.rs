//! Analyzer reply decoding
//!
//! Turns a raw reply (MLLP framed segment text from the relay, or a JSON
//! body from the HTTP endpoint) into an [`AnalyzerResult`]. Malformed
//! segments are skipped one at a time; a reply without a sample identifier
//! or without a single mappable observation is not a result.

use crate::error::{AnalyzerError, Result};
use crate::protocol::frame;
use crate::protocol::result::{
    AnalyzerResult, ResultComponent, ResultSource, ResultStatus, CBC_TEST_CODE,
};
use crate::protocol::segment::{
    self, first_component, Segment, COMPONENT_SEPARATOR, TAG_HEADER, TAG_IDENTIFICATION,
    TAG_OBSERVATION,
};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, trace, warn};

/// MSH field holding the message timestamp
const HEADER_TIMESTAMP_FIELD: usize = 6;
/// PID slots that may carry the sample identifier, in preference order
const SAMPLE_ID_FIELDS: [usize; 2] = [3, 2];
/// Minimum field count (tag included) of a standard OBX segment
const OBX_MIN_FIELDS: usize = 6;
/// Minimum field count of a compact `OBX|code|value|unit|flag` segment
const OBX_COMPACT_MIN_FIELDS: usize = 3;
/// OBX observation result status field
const OBX_STATUS_FIELD: usize = 11;

/// Raw reply bytes as received from the relay
///
/// Owned by the transport until handed to the codec, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    /// Reply bytes, framing included
    pub payload: Bytes,
    /// When the last byte of the reply arrived
    pub received_at: DateTime<Utc>,
}

impl RawReply {
    /// Wrap bytes received just now
    pub fn new(payload: impl Into<Bytes>) -> Self {
        RawReply {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// A reply produced by one of the transport strategies
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    /// Segment-delimited wire message
    Wire(RawReply),
    /// JSON reply from the HTTP endpoint
    Structured(StructuredReply),
}

impl ReplyPayload {
    /// Decode either payload form into a result
    pub fn decode(self) -> Result<AnalyzerResult> {
        match self {
            ReplyPayload::Wire(raw) => try_decode_reply(&raw.payload),
            ReplyPayload::Structured(reply) => reply.into_result(),
        }
    }
}

/// Decode a wire reply, returning `None` when it carries no usable result
///
/// The reason a reply was rejected is logged at `warn` level.
pub fn decode_reply(data: &[u8]) -> Option<AnalyzerResult> {
    match try_decode_reply(data) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(error = %e, bytes = data.len(), "Discarding undecodable analyzer reply");
            None
        }
    }
}

/// Decode a wire reply, reporting why it was rejected
///
/// # Errors
///
/// - [`AnalyzerError::Protocol`] - No sample identifier, or no mappable observation
pub fn try_decode_reply(data: &[u8]) -> Result<AnalyzerResult> {
    let text = String::from_utf8_lossy(frame::unwrap(data));
    trace!(bytes = data.len(), "Decoding analyzer reply");

    let mut timestamp = None;
    let mut sample_id: Option<String> = None;
    let mut components = Vec::new();
    let mut statuses = Vec::new();
    let mut observations = 0usize;

    for seg in segment::segments(&text) {
        match seg.tag() {
            TAG_HEADER => {
                if timestamp.is_none() {
                    timestamp = seg.non_empty(HEADER_TIMESTAMP_FIELD).map(render_timestamp);
                }
            }
            TAG_IDENTIFICATION => {
                if sample_id.is_none() {
                    sample_id = extract_sample_id(&seg);
                }
            }
            TAG_OBSERVATION => {
                observations += 1;
                match parse_observation(&seg) {
                    Ok(Some((component, status))) => {
                        components.push(component);
                        if let Some(status) = status {
                            statuses.push(status);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            error = %e,
                            segment_index = observations,
                            "Skipping malformed observation segment"
                        );
                    }
                }
            }
            other => {
                trace!(tag = other, "Ignoring segment");
            }
        }
    }

    let sample_id = sample_id.ok_or_else(|| {
        AnalyzerError::Protocol("reply carries no sample identifier".to_string())
    })?;

    if components.is_empty() {
        return Err(AnalyzerError::Protocol(format!(
            "none of {} observation segments for sample {} mapped to a known parameter",
            observations, sample_id
        )));
    }

    debug!(
        sample_id = %sample_id,
        components = components.len(),
        observations = observations,
        "Decoded analyzer reply"
    );

    Ok(AnalyzerResult {
        sample_id,
        test_code: CBC_TEST_CODE.to_string(),
        components,
        timestamp: timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
        status: overall_status(&statuses),
        source: ResultSource::Analyzer,
    })
}

fn extract_sample_id(seg: &Segment<'_>) -> Option<String> {
    SAMPLE_ID_FIELDS
        .iter()
        .filter_map(|&index| seg.non_empty(index))
        .map(first_component)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

/// Parse one OBX segment
///
/// `Ok(None)` means the parameter is unmapped and the segment is dropped.
fn parse_observation(seg: &Segment<'_>) -> Result<Option<(ResultComponent, Option<ResultStatus>)>> {
    let compact = seg
        .non_empty(1)
        .map(|set_id| !set_id.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);

    if compact {
        if seg.len() < OBX_COMPACT_MIN_FIELDS {
            return Err(malformed(seg, OBX_COMPACT_MIN_FIELDS));
        }
        let code = seg.field(1).unwrap_or("");
        let component = ResultComponent::from_instrument(
            code,
            seg.field(2).unwrap_or(""),
            seg.field(3).unwrap_or(""),
            seg.field(4).unwrap_or(""),
        );
        if component.is_none() {
            debug!(code = code, "Dropping unmapped parameter");
        }
        return Ok(component.map(|c| (c, None)));
    }

    if seg.len() < OBX_MIN_FIELDS {
        return Err(malformed(seg, OBX_MIN_FIELDS));
    }

    let identifier = seg.field(3).unwrap_or("");
    let code = identifier
        .split(COMPONENT_SEPARATOR)
        .map(str::trim)
        .find(|c| crate::mapping::canonical_name(c).is_some());

    let Some(code) = code else {
        debug!(identifier = identifier, "Dropping unmapped parameter");
        return Ok(None);
    };

    let component = ResultComponent::from_instrument(
        code,
        seg.field(5).unwrap_or(""),
        seg.field(6).unwrap_or(""),
        seg.field(8).unwrap_or(""),
    );

    let status = seg.non_empty(OBX_STATUS_FIELD).map(|s| match s {
        "P" | "I" | "R" => ResultStatus::Pending,
        "X" | "D" => ResultStatus::Error,
        _ => ResultStatus::Completed,
    });

    Ok(component.map(|c| (c, status)))
}

fn malformed(seg: &Segment<'_>, expected: usize) -> AnalyzerError {
    AnalyzerError::Protocol(format!(
        "{} segment has {} fields, expected at least {}",
        seg.tag(),
        seg.len(),
        expected
    ))
}

fn overall_status(statuses: &[ResultStatus]) -> ResultStatus {
    if statuses.contains(&ResultStatus::Error) {
        ResultStatus::Error
    } else if statuses.contains(&ResultStatus::Pending) {
        ResultStatus::Pending
    } else {
        ResultStatus::Completed
    }
}

/// Render an HL7 `TS` value as RFC 3339, or keep it verbatim if unparseable
///
/// A trailing `+HHMM`/`-HHMM` zone is honoured. Without one the value is the
/// analyzer's wall clock and is read in the host's local zone.
fn render_timestamp(raw: &str) -> String {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    let naive = match digits.len() {
        14.. => NaiveDateTime::parse_from_str(&digits[..14], "%Y%m%d%H%M%S").ok(),
        12 => NaiveDateTime::parse_from_str(&format!("{}00", digits), "%Y%m%d%H%M%S").ok(),
        _ => None,
    };
    let Some(naive) = naive else {
        return raw.to_string();
    };

    let rendered = match zone_offset(&raw[digits.len()..]) {
        Some(offset) => offset.from_local_datetime(&naive).single().map(|ts| ts.to_rfc3339()),
        None => Local.from_local_datetime(&naive).earliest().map(|ts| ts.to_rfc3339()),
    };
    rendered.unwrap_or_else(|| raw.to_string())
}

/// Zone designator at the end of an HL7 timestamp (after any fraction)
fn zone_offset(rest: &str) -> Option<FixedOffset> {
    let at = rest.find(|c| c == '+' || c == '-')?;
    let zone = &rest[at..];
    if zone.len() != 5 || !zone[1..].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = zone[1..3].parse().ok()?;
    let minutes: i32 = zone[3..5].parse().ok()?;
    let seconds = hours * 3600 + minutes * 60;
    if zone.starts_with('-') {
        FixedOffset::west_opt(seconds)
    } else {
        FixedOffset::east_opt(seconds)
    }
}

/// RFC 3339 values pass through; HL7 digits are rendered like a wire header
fn normalize_timestamp(raw: String) -> String {
    if DateTime::parse_from_rfc3339(&raw).is_ok() {
        raw
    } else {
        render_timestamp(&raw)
    }
}

/// JSON reply returned by the HTTP endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReply {
    /// Sample identifier
    #[serde(default, alias = "sample_id")]
    pub sample_id: Option<String>,
    /// Panel code; CBC when absent
    #[serde(default, alias = "test_code")]
    pub test_code: Option<String>,
    /// Result timestamp as reported by the endpoint
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Observations in transmission order
    #[serde(default, alias = "components")]
    pub results: Vec<StructuredObservation>,
}

/// One observation in a [`StructuredReply`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredObservation {
    /// Instrument parameter code
    #[serde(alias = "parameter", alias = "parameterCode")]
    pub code: String,
    /// Value as number or string
    pub value: serde_json::Value,
    /// Unit
    #[serde(default)]
    pub unit: Option<String>,
    /// Abnormal flag
    #[serde(default)]
    pub flag: Option<String>,
}

impl StructuredReply {
    /// Map the structured observations through the parameter vocabulary
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Protocol`] - No sample identifier, or no mappable observation
    pub fn into_result(self) -> Result<AnalyzerResult> {
        let sample_id = self
            .sample_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AnalyzerError::Protocol("structured reply carries no sample identifier".to_string())
            })?;

        let total = self.results.len();
        let components: Vec<_> = self
            .results
            .iter()
            .filter_map(|obs| {
                let value = match &obs.value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                let component = ResultComponent::from_instrument(
                    &obs.code,
                    &value,
                    obs.unit.as_deref().unwrap_or(""),
                    obs.flag.as_deref().unwrap_or(""),
                );
                if component.is_none() {
                    debug!(code = %obs.code, "Dropping unmapped parameter");
                }
                component
            })
            .collect();

        if components.is_empty() {
            return Err(AnalyzerError::Protocol(format!(
                "none of {} structured observations for sample {} mapped to a known parameter",
                total, sample_id
            )));
        }

        Ok(AnalyzerResult {
            sample_id,
            test_code: self
                .test_code
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| CBC_TEST_CODE.to_string()),
            components,
            timestamp: self
                .timestamp
                .filter(|t| !t.trim().is_empty())
                .map(normalize_timestamp)
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            status: ResultStatus::Completed,
            source: ResultSource::Analyzer,
        })
    }
}
