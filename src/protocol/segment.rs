//! Segment and field splitting
//!
//! A message is a sequence of segments separated by carriage returns; each
//! segment is a sequence of fields separated by `|`, the first field being a
//! three-letter tag.

/// Field separator within a segment
pub const FIELD_SEPARATOR: char = '|';

/// Component separator within a field
pub const COMPONENT_SEPARATOR: char = '^';

/// Encoding characters declared in MSH-2
pub const ENCODING_CHARACTERS: &str = "^~\\&";

/// Header segment tag
pub const TAG_HEADER: &str = "MSH";

/// Patient/sample identification segment tag
pub const TAG_IDENTIFICATION: &str = "PID";

/// Query definition segment tag
pub const TAG_QUERY: &str = "QRD";

/// Observation segment tag
pub const TAG_OBSERVATION: &str = "OBX";

/// One parsed segment borrowing from the message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    fields: Vec<&'a str>,
}

impl<'a> Segment<'a> {
    /// Split a single segment line into fields
    pub fn parse(line: &'a str) -> Self {
        Segment {
            fields: line.split(FIELD_SEPARATOR).collect(),
        }
    }

    /// Segment tag (first field)
    pub fn tag(&self) -> &'a str {
        self.fields.first().copied().unwrap_or("").trim()
    }

    /// Field at `index`, or `None` when the segment is too short
    ///
    /// Index 0 is the tag itself.
    pub fn field(&self, index: usize) -> Option<&'a str> {
        self.fields.get(index).copied()
    }

    /// Field at `index` trimmed, with an empty string treated as absent
    pub fn non_empty(&self, index: usize) -> Option<&'a str> {
        self.field(index).map(str::trim).filter(|f| !f.is_empty())
    }

    /// Number of fields including the tag
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the segment has no fields at all
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Split message text into non-empty segments
///
/// Accepts `\r`, `\n` and `\r\n` as segment delimiters.
pub fn segments(text: &str) -> impl Iterator<Item = Segment<'_>> {
    text.split(['\r', '\n'])
        .filter(|line| !line.trim().is_empty())
        .map(Segment::parse)
}

/// First component of a field (`a^b^c` -> `a`)
pub fn first_component(field: &str) -> &str {
    field.split(COMPONENT_SEPARATOR).next().unwrap_or("").trim()
}
