//! Attribution rewriting for the client-to-upstream command stream. A
//! COM_QUERY payload gains a trailing comment naming the authenticated user;
//! every other opcode passes through untouched, and responses flowing the
//! other way are never rewritten.
//!
//! This is a payload-only operation: the relay applies it to each logical
//! packet it decodes and re-frames the result through the packet writer,
//! which preserves the peer's sequence id and re-splits at the frame limit.

use crate::error::ProxyError;
use crate::protocol::mysql::constants::{CommandCode, MAX_PACKET_LENGTH};

const COMMENT_OPEN: &str = " /* user: ";
const COMMENT_CLOSE: &str = " */";

/// Appends the attribution comment to a COM_QUERY payload. `None` means the
/// payload is some other command and is to be forwarded as-is.
pub fn tag_com_query(payload: &[u8], username: &str) -> Result<Option<Vec<u8>>, ProxyError> {
    if payload.first() != Some(&(CommandCode::ComQuery as u8)) {
        return Ok(None);
    }
    let tagged_len =
        payload.len() + COMMENT_OPEN.len() + username.len() + COMMENT_CLOSE.len();
    if tagged_len > MAX_PACKET_LENGTH {
        return Err(ProxyError::OversizedRewrite(tagged_len));
    }
    let mut tagged = Vec::with_capacity(tagged_len);
    tagged.extend_from_slice(payload);
    tagged.extend_from_slice(COMMENT_OPEN.as_bytes());
    tagged.extend_from_slice(username.as_bytes());
    tagged.extend_from_slice(COMMENT_CLOSE.as_bytes());
    Ok(Some(tagged))
}
