//! `Content-Length` framing of wire [`Message`]s.
use bytes::{Buf, BytesMut};

use crate::Message;

const CONTENT_LENGTH: &[u8] = b"Content-Length";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("invalid utf8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("invalid integer")]
    InvalidInteger(#[from] std::num::ParseIntError),
    #[error("missing content-length header")]
    MissingContentLengthHeader,
    #[error("serializing or deserializing message content")]
    Serde(#[from] serde_json::Error),
}

/// Incremental frame decoder. Feed bytes into a [`BytesMut`] as they arrive
/// and call [`FrameDecoder::decode`] until it returns `None`; consumed frames
/// are advanced past, partial frames are left untouched.
#[derive(Default)]
#[derive(Debug)]
pub struct FrameDecoder {}

impl FrameDecoder {
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        // resynchronise on the next header if the peer left junk behind
        let Some(start) = find(src, CONTENT_LENGTH) else {
            return Ok(None);
        };
        src.advance(start);

        let Some(headers_len) = find(src, HEADER_END) else {
            return Ok(None);
        };

        let content_length = content_length(&src[..headers_len])?;
        let frame_len = headers_len + HEADER_END.len() + content_length;
        if src.len() < frame_len {
            return Ok(None);
        }

        let body = &src[headers_len + HEADER_END.len()..frame_len];
        let message = serde_json::from_slice(body)?;
        src.advance(frame_len);
        Ok(Some(message))
    }
}

/// Frame one message for the wire.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_string(message)?;
    Ok(format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(headers: &[u8]) -> Result<usize, CodecError> {
    let headers = std::str::from_utf8(headers)?;
    for header in headers.split("\r\n") {
        let mut parts = header.splitn(2, ':');
        let key = parts.next().unwrap_or_default().trim();
        if key == "Content-Length" {
            let value = parts.next().ok_or(CodecError::MissingContentLengthHeader)?;
            return Ok(value.trim().parse()?);
        }
    }
    Err(CodecError::MissingContentLengthHeader)
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;
    use crate::requests::Request;
    use crate::responses::Response;

    fn put_message(buffer: &mut BytesMut, message: &Message) {
        let bytes = encode_message(message).unwrap();
        buffer.put(&bytes[..]);
    }

    #[test]
    fn decode_one_frame() {
        let mut buffer = BytesMut::new();
        put_message(&mut buffer, &Message::Request(Request::KillDebugee));

        let mut decoder = FrameDecoder::default();
        let message = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(matches!(message, Message::Request(Request::KillDebugee)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_frame_is_left_alone() {
        let mut buffer = BytesMut::new();
        put_message(&mut buffer, &Message::Response(Response::ok(0)));
        let full = buffer.len();
        buffer.truncate(full - 3);

        let mut decoder = FrameDecoder::default();
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        // nothing consumed: the remaining bytes complete the frame later
        assert_eq!(buffer.len(), full - 3);
    }

    #[test]
    fn decode_two_back_to_back_frames() {
        let mut buffer = BytesMut::new();
        put_message(&mut buffer, &Message::Request(Request::Disconnect));
        put_message(&mut buffer, &Message::Response(Response::ok(42)));

        let mut decoder = FrameDecoder::default();
        assert!(matches!(
            decoder.decode(&mut buffer).unwrap().unwrap(),
            Message::Request(Request::Disconnect)
        ));
        match decoder.decode(&mut buffer).unwrap().unwrap() {
            Message::Response(Response::Ok(ack)) => assert_eq!(ack.info, 42),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn junk_before_the_header_is_skipped() {
        let mut buffer = BytesMut::new();
        buffer.put(&b"\r\n\r\n"[..]);
        put_message(&mut buffer, &Message::Request(Request::DebugeeExitCode));

        let mut decoder = FrameDecoder::default();
        assert!(matches!(
            decoder.decode(&mut buffer).unwrap().unwrap(),
            Message::Request(Request::DebugeeExitCode)
        ));
    }

    #[test]
    fn bad_content_length_is_an_error() {
        let mut buffer = BytesMut::from(&b"Content-Length: zero\r\n\r\n{}"[..]);
        let mut decoder = FrameDecoder::default();
        assert!(matches!(
            decoder.decode(&mut buffer),
            Err(CodecError::InvalidInteger(_))
        ));
    }
}
