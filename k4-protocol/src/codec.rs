//! Framing for the host channel
//!
//! Inbound responses are newline-terminated JSON objects. Outbound requests
//! are written as bare JSON values by default, which is what the host's
//! streaming JSON decoder expects; newline-terminated requests are opt-in.

use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Request, Response};

/// Maximum frame size (16 MB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const DELIMITER: u8 = b'\n';

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Channel closed with {len} bytes of an unterminated frame")]
    TruncatedFrame { len: usize },
}

/// How outbound requests are delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestFraming {
    /// No delimiter; the host decodes one JSON value per request
    #[default]
    Raw,
    /// Each request is followed by a single `\n`
    NewlineTerminated,
}

impl FromStr for RequestFraming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(Self::Raw),
            "newline" | "line" | "nl" => Ok(Self::NewlineTerminated),
            other => Err(format!(
                "unknown request framing '{}' (expected 'raw' or 'newline')",
                other
            )),
        }
    }
}

/// The payload of one inbound frame, without its delimiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the payload as a response
    pub fn parse(&self) -> Result<Response, serde_json::Error> {
        Response::from_slice(&self.0)
    }
}

/// Splits the inbound byte stream into newline-terminated frames
///
/// Each `decode` call yields at most one frame. Bytes after the delimiter
/// stay in the buffer for the next call, so a caller that loops (as
/// `FramedRead` does) drains every complete frame.
#[derive(Debug)]
pub struct ResponseCodec {
    max_frame_len: usize,
    /// Bytes of `src` already known to contain no delimiter
    scanned: usize,
}

impl ResponseCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scanned: 0,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ResponseCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.scanned.min(src.len());

        match src[start..].iter().position(|b| *b == DELIMITER) {
            Some(offset) => {
                let end = start + offset;
                self.scanned = 0;

                if end > self.max_frame_len {
                    return Err(CodecError::FrameTooLarge {
                        size: end,
                        max: self.max_frame_len,
                    });
                }

                let mut frame = src.split_to(end + 1);
                frame.truncate(end);
                Ok(Some(Frame(frame.freeze())))
            }
            None => {
                if src.len() > self.max_frame_len {
                    return Err(CodecError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_len,
                    });
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if src.is_empty() {
            Ok(None)
        } else {
            let len = src.len();
            src.clear();
            self.scanned = 0;
            Err(CodecError::TruncatedFrame { len })
        }
    }
}

/// Serializes requests using the configured framing
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestEncoder {
    framing: RequestFraming,
}

impl RequestEncoder {
    pub fn new(framing: RequestFraming) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> RequestFraming {
        self.framing
    }
}

impl<P: Serialize> Encoder<Request<'_, P>> for RequestEncoder {
    type Error = CodecError;

    fn encode(&mut self, item: Request<'_, P>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(&item)?;

        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        if self.framing == RequestFraming::NewlineTerminated {
            dst.put_u8(DELIMITER);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn test_decode_single_frame() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":0,\"error\":null,\"result\":7}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), br#"{"id":0,"error":null,"result":7}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_delimiter() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":0,\"err"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 12);

        buf.extend_from_slice(b"or\":null,\"result\":7}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        let resp = frame.parse().unwrap();
        assert_eq!(resp.id, 0);
        assert_eq!(resp.result, json!(7));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_trailing_bytes_kept() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1}\n{\"id\":2"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), br#"{"id":1}"#);
        assert_eq!(&buf[..], br#"{"id":2"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_one_frame_per_decode_call() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1}\n{\"id\":2}\n"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.parse().unwrap().id, 1);
        assert_eq!(&buf[..], b"{\"id\":2}\n");

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.parse().unwrap().id, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_empty_frame() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
        assert!(frame.parse().is_err());
    }

    #[test]
    fn test_scan_resumes_after_partial() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"abc"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.scanned, 3);

        buf.extend_from_slice(b"def\nx");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"abcdef");
        assert_eq!(codec.scanned, 0);
        assert_eq!(&buf[..], b"x");
    }

    #[test]
    fn test_frame_too_large_without_delimiter() {
        let mut codec = ResponseCodec::with_max_frame_len(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(CodecError::FrameTooLarge { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_frame_too_large_with_delimiter() {
        let mut codec = ResponseCodec::with_max_frame_len(4);
        let mut buf = BytesMut::from(&b"0123456\n"[..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { size: 7, .. })));
    }

    #[test]
    fn test_frame_at_limit_accepted() {
        let mut codec = ResponseCodec::with_max_frame_len(4);
        let mut buf = BytesMut::from(&b"1234\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_bytes(), b"1234");
    }

    #[test]
    fn test_decode_eof_truncated() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":0"[..]);

        let result = codec.decode_eof(&mut buf);
        assert!(matches!(result, Err(CodecError::TruncatedFrame { len: 7 })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_eof_clean() {
        let mut codec = ResponseCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_raw_has_no_delimiter() {
        let mut encoder = RequestEncoder::default();
        let mut buf = BytesMut::new();
        encoder
            .encode(Request::new(0, "echo", json!({"x": 1})), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], br#"{"id":0,"method":"echo","params":[{"x":1}]}"#);
    }

    #[test]
    fn test_encode_newline_terminated() {
        let mut encoder = RequestEncoder::new(RequestFraming::NewlineTerminated);
        let mut buf = BytesMut::new();
        encoder
            .encode(Request::new(5, "Context.Get", json!({})), &mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            b"{\"id\":5,\"method\":\"Context.Get\",\"params\":[{}]}\n"
        );
    }

    #[test]
    fn test_encode_appends_to_buffer() {
        let mut encoder = RequestEncoder::default();
        let mut buf = BytesMut::new();
        encoder.encode(Request::new(0, "a", 1), &mut buf).unwrap();
        encoder.encode(Request::new(1, "b", 2), &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            br#"{"id":0,"method":"a","params":[1]}{"id":1,"method":"b","params":[2]}"#
        );
    }

    #[test]
    fn test_request_framing_from_str() {
        assert_eq!("raw".parse::<RequestFraming>(), Ok(RequestFraming::Raw));
        assert_eq!(
            "Newline".parse::<RequestFraming>(),
            Ok(RequestFraming::NewlineTerminated)
        );
        assert!("crlf".parse::<RequestFraming>().is_err());
    }

    #[tokio::test]
    async fn test_framed_read_drains_all_frames_in_one_delivery() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut frames = FramedRead::new(rx, ResponseCodec::new());

        tx.write_all(b"{\"id\":0,\"result\":1}\n{\"id\":1,\"result\":2}\n")
            .await
            .unwrap();
        drop(tx);

        let first = frames.next().await.unwrap().unwrap().parse().unwrap();
        let second = frames.next().await.unwrap().unwrap().parse().unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_framed_read_reports_truncated_tail() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut frames = FramedRead::new(rx, ResponseCodec::new());

        tx.write_all(b"{\"id\":0,\"res").await.unwrap();
        drop(tx);

        let result = frames.next().await.unwrap();
        assert!(matches!(result, Err(CodecError::TruncatedFrame { len: 12 })));
    }
}
