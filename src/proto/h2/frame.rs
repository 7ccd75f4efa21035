//! HTTP/2 frame layer: parsing and serialization.
//!
//! Frame header layout per RFC 9113 §4.1: 24-bit length, 8-bit type,
//! 8-bit flags, 31-bit stream identifier. Header block fragments stay
//! opaque here; HPACK coding happens in the state machine.

use bytes::{Bytes, BytesMut};

pub(crate) const FRAME_HEADER_LEN: usize = 9;
pub(crate) const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;
pub(crate) const DEFAULT_WINDOW_SIZE: u32 = 65_535;

pub(crate) const CLIENT_MAGIC: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

// Frame types, RFC 9113 §6.
pub(crate) const DATA: u8 = 0x0;
pub(crate) const HEADERS: u8 = 0x1;
pub(crate) const PRIORITY: u8 = 0x2;
pub(crate) const RST_STREAM: u8 = 0x3;
pub(crate) const SETTINGS: u8 = 0x4;
pub(crate) const PUSH_PROMISE: u8 = 0x5;
pub(crate) const PING: u8 = 0x6;
pub(crate) const GOAWAY: u8 = 0x7;
pub(crate) const WINDOW_UPDATE: u8 = 0x8;
pub(crate) const CONTINUATION: u8 = 0x9;

// Frame flags.
pub(crate) const FLAG_END_STREAM: u8 = 0x1;
pub(crate) const FLAG_ACK: u8 = 0x1;
pub(crate) const FLAG_END_HEADERS: u8 = 0x4;
pub(crate) const FLAG_PADDED: u8 = 0x8;
pub(crate) const FLAG_PRIORITY: u8 = 0x20;

// Error codes, RFC 9113 §7.
pub(crate) const PROTOCOL_ERROR: u64 = 0x1;
pub(crate) const FLOW_CONTROL_ERROR: u64 = 0x3;
pub(crate) const FRAME_SIZE_ERROR: u64 = 0x6;
pub(crate) const COMPRESSION_ERROR: u64 = 0x9;

// Settings identifiers, RFC 9113 §6.5.2.
pub(crate) const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub(crate) const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub(crate) const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub(crate) const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub(crate) const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub(crate) const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// A connection error detected at the frame layer.
#[derive(Debug)]
pub(crate) struct FrameError {
    pub code: u64,
    pub message: String,
}

impl FrameError {
    fn new(code: u64, message: impl Into<String>) -> Self {
        FrameError {
            code,
            message: message.into(),
        }
    }
}

/// One parsed HTTP/2 frame.
#[derive(Debug)]
pub(crate) enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Full payload length including padding, for flow control.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        settings: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    Goaway {
        last_stream_id: u32,
        error_code: u32,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    /// Priority and unrecognized frame types are consumed and ignored.
    Ignored,
}

/// Parses one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes consumed, or `None` when more
/// bytes are needed.
pub(crate) fn decode(
    buf: &[u8],
    max_frame_size: usize,
) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]) as usize;
    let kind = buf[3];
    let flags = buf[4];
    let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
    if length > max_frame_size {
        return Err(FrameError::new(
            FRAME_SIZE_ERROR,
            format!("frame of {length} bytes exceeds the maximum frame size"),
        ));
    }
    let total = FRAME_HEADER_LEN + length;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[FRAME_HEADER_LEN..total];
    let frame = match kind {
        DATA => {
            if stream_id == 0 {
                return Err(FrameError::new(PROTOCOL_ERROR, "DATA frame on stream 0"));
            }
            let data = strip_padding(payload, flags)?;
            Frame::Data {
                stream_id,
                data: Bytes::copy_from_slice(data),
                end_stream: flags & FLAG_END_STREAM != 0,
                flow_len: length as u32,
            }
        }
        HEADERS => {
            if stream_id == 0 {
                return Err(FrameError::new(PROTOCOL_ERROR, "HEADERS frame on stream 0"));
            }
            let mut fragment = strip_padding(payload, flags)?;
            if flags & FLAG_PRIORITY != 0 {
                if fragment.len() < 5 {
                    return Err(FrameError::new(
                        FRAME_SIZE_ERROR,
                        "HEADERS frame too short for its priority block",
                    ));
                }
                fragment = &fragment[5..];
            }
            Frame::Headers {
                stream_id,
                fragment: Bytes::copy_from_slice(fragment),
                end_stream: flags & FLAG_END_STREAM != 0,
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        CONTINUATION => Frame::Continuation {
            stream_id,
            fragment: Bytes::copy_from_slice(payload),
            end_headers: flags & FLAG_END_HEADERS != 0,
        },
        RST_STREAM => {
            if payload.len() != 4 {
                return Err(FrameError::new(FRAME_SIZE_ERROR, "bad RST_STREAM length"));
            }
            if stream_id == 0 {
                return Err(FrameError::new(PROTOCOL_ERROR, "RST_STREAM on stream 0"));
            }
            Frame::RstStream {
                stream_id,
                error_code: u32::from_be_bytes(payload.try_into().unwrap()),
            }
        }
        SETTINGS => {
            if stream_id != 0 {
                return Err(FrameError::new(
                    PROTOCOL_ERROR,
                    "SETTINGS frame on a nonzero stream",
                ));
            }
            let ack = flags & FLAG_ACK != 0;
            if ack && !payload.is_empty() {
                return Err(FrameError::new(
                    FRAME_SIZE_ERROR,
                    "SETTINGS ACK with a payload",
                ));
            }
            if payload.len() % 6 != 0 {
                return Err(FrameError::new(FRAME_SIZE_ERROR, "bad SETTINGS length"));
            }
            let settings = payload
                .chunks_exact(6)
                .map(|chunk| {
                    (
                        u16::from_be_bytes([chunk[0], chunk[1]]),
                        u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
                    )
                })
                .collect();
            Frame::Settings { ack, settings }
        }
        PUSH_PROMISE => Frame::PushPromise { stream_id },
        PING => {
            if payload.len() != 8 {
                return Err(FrameError::new(FRAME_SIZE_ERROR, "bad PING length"));
            }
            if stream_id != 0 {
                return Err(FrameError::new(
                    PROTOCOL_ERROR,
                    "PING frame on a nonzero stream",
                ));
            }
            Frame::Ping {
                ack: flags & FLAG_ACK != 0,
                payload: payload.try_into().unwrap(),
            }
        }
        GOAWAY => {
            if payload.len() < 8 {
                return Err(FrameError::new(FRAME_SIZE_ERROR, "bad GOAWAY length"));
            }
            Frame::Goaway {
                last_stream_id: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                    & 0x7fff_ffff,
                error_code: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            }
        }
        WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(FrameError::new(FRAME_SIZE_ERROR, "bad WINDOW_UPDATE length"));
            }
            let increment =
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
            if increment == 0 {
                return Err(FrameError::new(
                    PROTOCOL_ERROR,
                    "WINDOW_UPDATE with a zero increment",
                ));
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
        }
        PRIORITY => {
            if payload.len() != 5 {
                return Err(FrameError::new(FRAME_SIZE_ERROR, "bad PRIORITY length"));
            }
            Frame::Ignored
        }
        _ => Frame::Ignored,
    };
    Ok(Some((frame, total)))
}

fn strip_padding(payload: &[u8], flags: u8) -> Result<&[u8], FrameError> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    let pad_length = *payload
        .first()
        .ok_or_else(|| FrameError::new(FRAME_SIZE_ERROR, "padded frame with no payload"))?
        as usize;
    if pad_length + 1 > payload.len() {
        return Err(FrameError::new(
            PROTOCOL_ERROR,
            "padding exceeds the frame payload",
        ));
    }
    Ok(&payload[1..payload.len() - pad_length])
}

pub(crate) fn write_frame_header(
    out: &mut BytesMut,
    length: usize,
    kind: u8,
    flags: u8,
    stream_id: u32,
) {
    let length = length as u32;
    out.extend_from_slice(&[
        (length >> 16) as u8,
        (length >> 8) as u8,
        length as u8,
        kind,
        flags,
    ]);
    out.extend_from_slice(&stream_id.to_be_bytes());
}

pub(crate) fn write_data(out: &mut BytesMut, stream_id: u32, data: &[u8], end_stream: bool) {
    let flags = if end_stream { FLAG_END_STREAM } else { 0 };
    write_frame_header(out, data.len(), DATA, flags, stream_id);
    out.extend_from_slice(data);
}

pub(crate) fn write_headers(
    out: &mut BytesMut,
    stream_id: u32,
    fragment: &[u8],
    end_stream: bool,
    end_headers: bool,
) {
    let mut flags = 0;
    if end_stream {
        flags |= FLAG_END_STREAM;
    }
    if end_headers {
        flags |= FLAG_END_HEADERS;
    }
    write_frame_header(out, fragment.len(), HEADERS, flags, stream_id);
    out.extend_from_slice(fragment);
}

pub(crate) fn write_continuation(
    out: &mut BytesMut,
    stream_id: u32,
    fragment: &[u8],
    end_headers: bool,
) {
    let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
    write_frame_header(out, fragment.len(), CONTINUATION, flags, stream_id);
    out.extend_from_slice(fragment);
}

pub(crate) fn write_rst_stream(out: &mut BytesMut, stream_id: u32, error_code: u32) {
    write_frame_header(out, 4, RST_STREAM, 0, stream_id);
    out.extend_from_slice(&error_code.to_be_bytes());
}

pub(crate) fn write_settings(out: &mut BytesMut, ack: bool, settings: &[(u16, u32)]) {
    let flags = if ack { FLAG_ACK } else { 0 };
    write_frame_header(out, settings.len() * 6, SETTINGS, flags, 0);
    for (id, value) in settings {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
}

pub(crate) fn write_ping(out: &mut BytesMut, ack: bool, payload: &[u8; 8]) {
    let flags = if ack { FLAG_ACK } else { 0 };
    write_frame_header(out, 8, PING, flags, 0);
    out.extend_from_slice(payload);
}

pub(crate) fn write_goaway(out: &mut BytesMut, last_stream_id: u32, error_code: u32) {
    write_frame_header(out, 8, GOAWAY, 0, 0);
    out.extend_from_slice(&last_stream_id.to_be_bytes());
    out.extend_from_slice(&error_code.to_be_bytes());
}

pub(crate) fn write_window_update(out: &mut BytesMut, stream_id: u32, increment: u32) {
    write_frame_header(out, 4, WINDOW_UPDATE, 0, stream_id);
    out.extend_from_slice(&increment.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Frame {
        let (frame, consumed) = decode(bytes, DEFAULT_MAX_FRAME_SIZE)
            .expect("expected successful parse")
            .expect("expected a complete frame");
        assert_eq!(consumed, bytes.len());
        frame
    }

    #[test]
    fn test_data_roundtrip() {
        let mut out = BytesMut::new();
        write_data(&mut out, 1, b"Hello HTTP!", true);
        match decode_one(&out) {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => {
                assert_eq!(stream_id, 1);
                assert_eq!(data.as_ref(), b"Hello HTTP!");
                assert!(end_stream);
                assert_eq!(flow_len, 11);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_data_padding() {
        // length 7: pad length byte + "ab" + 4 bytes of padding.
        let mut raw = vec![0, 0, 7, DATA, FLAG_PADDED, 0, 0, 0, 3];
        raw.extend_from_slice(&[4, b'a', b'b', 0, 0, 0, 0]);
        match decode_one(&raw) {
            Frame::Data { data, flow_len, .. } => {
                assert_eq!(data.as_ref(), b"ab");
                assert_eq!(flow_len, 7);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_excessive_padding_is_rejected() {
        let mut raw = vec![0, 0, 2, DATA, FLAG_PADDED, 0, 0, 0, 3];
        raw.extend_from_slice(&[5, b'a']);
        let err = decode(&raw, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.code, PROTOCOL_ERROR);
    }

    #[test]
    fn test_settings_roundtrip() {
        let mut out = BytesMut::new();
        write_settings(&mut out, false, &[(SETTINGS_ENABLE_PUSH, 0)]);
        match decode_one(&out) {
            Frame::Settings { ack, settings } => {
                assert!(!ack);
                assert_eq!(settings, vec![(SETTINGS_ENABLE_PUSH, 0)]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_ping_roundtrip() {
        let mut out = BytesMut::new();
        write_ping(&mut out, true, &[1, 2, 3, 4, 5, 6, 7, 8]);
        match decode_one(&out) {
            Frame::Ping { ack, payload } => {
                assert!(ack);
                assert_eq!(payload, [1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_bad_rst_stream_length() {
        let raw = [0, 0, 2, RST_STREAM, 0, 0, 0, 0, 1, 0, 0];
        let err = decode(&raw, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.code, FRAME_SIZE_ERROR);
    }

    #[test]
    fn test_goaway_roundtrip() {
        let mut out = BytesMut::new();
        write_goaway(&mut out, 5, 0x0A);
        match decode_one(&out) {
            Frame::Goaway {
                last_stream_id,
                error_code,
            } => {
                assert_eq!(last_stream_id, 5);
                assert_eq!(error_code, 0x0A);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_zero_window_increment_is_rejected() {
        let mut out = BytesMut::new();
        write_window_update(&mut out, 1, 0);
        let err = decode(&out, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.code, PROTOCOL_ERROR);
    }

    #[test]
    fn test_partial_frame() {
        let mut out = BytesMut::new();
        write_data(&mut out, 1, b"payload", false);
        assert!(decode(&out[..5], DEFAULT_MAX_FRAME_SIZE).unwrap().is_none());
        assert!(decode(&out[..10], DEFAULT_MAX_FRAME_SIZE).unwrap().is_none());
    }
}
