//! BC-10 message codec
//!
//! Pure transforms between in-memory query/result shapes and the analyzer's
//! MLLP-framed, segment-delimited wire format. Nothing in this module does I/O.

pub mod frame;
pub mod query;
pub mod reply;
pub mod result;
pub mod segment;

// Re-export commonly used types
pub use query::{encode_query, validate_sample_id, QueryMessage};
pub use reply::{decode_reply, try_decode_reply, RawReply, ReplyPayload, StructuredReply};
pub use result::{
    AnalyzerResult, ComponentMap, ComponentValue, ResultComponent, ResultSource, ResultStatus,
    CBC_TEST_CODE,
};
