//! Result query encoding
//!
//! A query is an `MSH` header plus a `QRD` query definition asking the
//! analyzer for every result recorded against one sample.

use crate::error::{AnalyzerError, Result};
use crate::protocol::frame;
use crate::protocol::segment::{ENCODING_CHARACTERS, FIELD_SEPARATOR, TAG_HEADER, TAG_QUERY};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Sending application (MSH-3)
pub const SENDING_APPLICATION: &str = "HMIS";
/// Sending facility (MSH-4)
pub const SENDING_FACILITY: &str = "LAB";
/// Receiving application (MSH-5)
pub const RECEIVING_APPLICATION: &str = "BC-10";
/// Receiving facility (MSH-6)
pub const RECEIVING_FACILITY: &str = "MINDRAY";
/// Message type for a result query (MSH-9)
pub const QUERY_MESSAGE_TYPE: &str = "QRY^R02";
/// HL7 version spoken by the BC-10 LIS interface (MSH-12)
pub const HL7_VERSION: &str = "2.3.1";

/// HL7 `TS` timestamp layout
pub const HL7_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A single result query
///
/// Created per request and only lives long enough to be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    /// Sample identifier to query
    pub sample_id: String,
    /// Time the query was issued, embedded in the header
    pub issued_at: DateTime<Utc>,
}

impl QueryMessage {
    /// Create a query stamped with the current time
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Validation`] - Sample id is empty or contains delimiters
    pub fn new(sample_id: &str) -> Result<Self> {
        Self::at(sample_id, Utc::now())
    }

    /// Create a query with an explicit issue time
    pub fn at(sample_id: &str, issued_at: DateTime<Utc>) -> Result<Self> {
        let sample_id = validate_sample_id(sample_id)?;
        Ok(QueryMessage {
            sample_id: sample_id.to_string(),
            issued_at,
        })
    }

    /// Segment text without framing
    pub fn to_segments(&self) -> String {
        let ts = self.issued_at.format(HL7_TIMESTAMP_FORMAT).to_string();
        let msh = [
            TAG_HEADER,
            ENCODING_CHARACTERS,
            SENDING_APPLICATION,
            SENDING_FACILITY,
            RECEIVING_APPLICATION,
            RECEIVING_FACILITY,
            &ts,
            "",
            QUERY_MESSAGE_TYPE,
            &ts,
            "P",
            HL7_VERSION,
        ];
        let qrd = [
            TAG_QUERY,
            &ts,
            "R",
            "I",
            &self.sample_id,
            "",
            "",
            "RD^ALL",
            &self.sample_id,
            "RES",
            "",
            "",
            "T",
        ];

        let sep = FIELD_SEPARATOR.to_string();
        format!("{}\r{}\r", msh.join(&sep), qrd.join(&sep))
    }

    /// Encode the framed query
    ///
    /// # Examples
    ///
    /// ```
    /// use bc10_analyzer::protocol::QueryMessage;
    ///
    /// let query = QueryMessage::new("CBC001")?;
    /// let bytes = query.encode();
    /// assert_eq!(bytes[0], 0x0B);
    /// # Ok::<(), bc10_analyzer::AnalyzerError>(())
    /// ```
    pub fn encode(&self) -> Bytes {
        frame::wrap(self.to_segments().as_bytes())
    }
}

/// Encode a query for `sample_id` stamped with the current time
pub fn encode_query(sample_id: &str) -> Result<Bytes> {
    Ok(QueryMessage::new(sample_id)?.encode())
}

/// Trim and check a caller-supplied sample identifier
pub fn validate_sample_id(sample_id: &str) -> Result<&str> {
    let trimmed = sample_id.trim();
    if trimmed.is_empty() {
        return Err(AnalyzerError::Validation(
            "sample id must not be empty".to_string(),
        ));
    }
    if trimmed
        .chars()
        .any(|c| matches!(c, '|' | '^' | '~' | '\\' | '&' | '\r' | '\n') || c.is_control())
    {
        return Err(AnalyzerError::Validation(format!(
            "sample id {:?} contains reserved delimiter characters",
            trimmed
        )));
    }
    Ok(trimmed)
}
