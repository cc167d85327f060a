//! MLLP byte-level framing
//!
//! The BC-10 frames every message as `<VT> payload <FS><CR>`. Framing is
//! applied once per message, never per segment.

use bytes::{BufMut, Bytes, BytesMut};

/// Start-of-block byte (vertical tab)
pub const START_BLOCK: u8 = 0x0B;

/// End-of-block byte (file separator)
pub const END_BLOCK: u8 = 0x1C;

/// Carriage return closing the frame; also the segment delimiter
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Largest frame accepted from the relay
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Wrap a payload in MLLP framing
///
/// # Examples
///
/// ```
/// use bc10_analyzer::protocol::frame::wrap;
///
/// let framed = wrap(b"MSH|^~\\&");
/// assert_eq!(framed[0], 0x0B);
/// assert_eq!(&framed[framed.len() - 2..], &[0x1C, 0x0D]);
/// ```
pub fn wrap(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 3);
    buf.put_u8(START_BLOCK);
    buf.put_slice(payload);
    buf.put_u8(END_BLOCK);
    buf.put_u8(CARRIAGE_RETURN);
    buf.freeze()
}

/// Strip MLLP framing if present
///
/// Bytes before the start block are discarded. A payload without framing is
/// returned unchanged, so fixture replies and HTTP bodies decode the same
/// way as relay frames.
pub fn unwrap(data: &[u8]) -> &[u8] {
    let mut payload = match data.iter().position(|&b| b == START_BLOCK) {
        Some(start) => &data[start + 1..],
        None => data,
    };

    if let Some(end) = payload.iter().position(|&b| b == END_BLOCK) {
        payload = &payload[..end];
    }

    payload
}

/// Find the end of the first complete frame in `buf`
///
/// Returns the index one past the trailing carriage return.
pub fn frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2)
        .position(|w| w[0] == END_BLOCK && w[1] == CARRIAGE_RETURN)
        .map(|pos| pos + 2)
}
