//! Tunnel event model and the codec boundary.
//!
//! The local agent and the relay server exchange framed events over an HTTP
//! request/response channel. The cipher layer (compression + encryption of
//! frame payloads) lives behind [`EventCodec`]; the relay core only decides
//! *which* wrapping to ask for. [`FrameCodec`] is the stock implementation:
//! it produces the stable wire framing and records the requested envelopes
//! in the frame flags, leaving the payload transform to deployments that
//! plug in a sealing codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Envelope flags: payload is wrapped in a compression envelope.
const FLAG_COMPRESSED: u8 = 0x01;
/// Envelope flags: payload is wrapped in an encryption envelope.
const FLAG_ENCRYPTED: u8 = 0x02;

const TAG_USER_LOGIN: u8 = 1;
const TAG_TCP_CONNECTION: u8 = 2;
const TAG_HTTP_REQUEST: u8 = 3;
const TAG_TCP_CHUNK: u8 = 4;

/// Connection status carried by [`Event::TcpConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Connected,
    Closed,
}

/// A proxied HTTP request travelling through the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestEvent {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequestEvent {
    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize as an HTTP/1.1 request for writing to an origin socket.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.url.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
    }
}

/// One tunnel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A user (re-)logged in; the relay drops all of that user's state.
    UserLogin { user: String },
    /// Origin connection state change; `Closed` is the terminal event.
    TcpConnection { status: ConnStatus, addr: String },
    /// A proxied request to (re-)play against the origin.
    HttpRequest(HttpRequestEvent),
    /// Raw stream bytes; `sequence` restores ordering across HTTP batches.
    TcpChunk { content: Bytes, sequence: u32 },
}

/// An [`Event`] addressed to one logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: u32,
    pub event: Event,
}

/// Envelope wrapping requested at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrapping {
    pub compress: bool,
    pub encrypt: bool,
}

impl Wrapping {
    /// No envelopes at all.
    pub fn plain() -> Self {
        Self { compress: false, encrypt: false }
    }

    /// Encrypted, optionally compressed first.
    pub fn sealed(compress: bool) -> Self {
        Self { compress, encrypt: true }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated event frame")]
    Truncated,
    #[error("unknown event tag {0}")]
    UnknownTag(u8),
    #[error("malformed event frame: {0}")]
    Malformed(&'static str),
    #[error("invalid utf-8 in event field")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encoder/decoder for framed event streams.
///
/// `decode` strips envelopes and yields the next event, `Ok(None)` once the
/// buffer is fully consumed. A frame that cannot be decoded is an error; the
/// caller decides how much of the batch to salvage.
pub trait EventCodec: Send + Sync {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<SessionEvent>, CodecError>;
    fn encode(
        &self,
        buf: &mut BytesMut,
        ev: &SessionEvent,
        wrapping: Wrapping,
    ) -> Result<(), CodecError>;
}

/// Stock codec: length-prefixed binary frames, identity payload transform.
///
/// Frame layout: `u32 length | u8 tag | u8 flags | u32 session | payload`,
/// all integers big-endian, `length` covering everything after itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl EventCodec for FrameCodec {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<SessionEvent>, CodecError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() < 4 {
            return Err(CodecError::Truncated);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Err(CodecError::Truncated);
        }
        buf.advance(4);
        let mut frame = buf.split_to(len);

        let tag = get_u8(&mut frame)?;
        let _flags = get_u8(&mut frame)?;
        let session = get_u32(&mut frame)?;

        let event = match tag {
            TAG_USER_LOGIN => Event::UserLogin { user: get_string(&mut frame)? },
            TAG_TCP_CONNECTION => {
                let status = match get_u8(&mut frame)? {
                    0 => ConnStatus::Connected,
                    1 => ConnStatus::Closed,
                    _ => return Err(CodecError::Malformed("connection status")),
                };
                Event::TcpConnection { status, addr: get_string(&mut frame)? }
            }
            TAG_HTTP_REQUEST => {
                let method = get_string(&mut frame)?;
                let url = get_string(&mut frame)?;
                let count = get_u16(&mut frame)? as usize;
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = get_string(&mut frame)?;
                    let value = get_string(&mut frame)?;
                    headers.push((name, value));
                }
                let body = get_bytes(&mut frame)?;
                Event::HttpRequest(HttpRequestEvent { method, url, headers, body })
            }
            TAG_TCP_CHUNK => {
                let sequence = get_u32(&mut frame)?;
                Event::TcpChunk { content: get_bytes(&mut frame)?, sequence }
            }
            other => return Err(CodecError::UnknownTag(other)),
        };

        if !frame.is_empty() {
            return Err(CodecError::Malformed("trailing bytes in frame"));
        }
        Ok(Some(SessionEvent { session, event }))
    }

    fn encode(
        &self,
        buf: &mut BytesMut,
        ev: &SessionEvent,
        wrapping: Wrapping,
    ) -> Result<(), CodecError> {
        let mut flags = 0u8;
        if wrapping.compress {
            flags |= FLAG_COMPRESSED;
        }
        if wrapping.encrypt {
            flags |= FLAG_ENCRYPTED;
        }

        let mut body = BytesMut::new();
        match &ev.event {
            Event::UserLogin { user } => {
                body.put_u8(TAG_USER_LOGIN);
                body.put_u8(flags);
                body.put_u32(ev.session);
                put_string(&mut body, user);
            }
            Event::TcpConnection { status, addr } => {
                body.put_u8(TAG_TCP_CONNECTION);
                body.put_u8(flags);
                body.put_u32(ev.session);
                body.put_u8(match status {
                    ConnStatus::Connected => 0,
                    ConnStatus::Closed => 1,
                });
                put_string(&mut body, addr);
            }
            Event::HttpRequest(req) => {
                body.put_u8(TAG_HTTP_REQUEST);
                body.put_u8(flags);
                body.put_u32(ev.session);
                put_string(&mut body, &req.method);
                put_string(&mut body, &req.url);
                body.put_u16(req.headers.len() as u16);
                for (name, value) in &req.headers {
                    put_string(&mut body, name);
                    put_string(&mut body, value);
                }
                put_bytes(&mut body, &req.body);
            }
            Event::TcpChunk { content, sequence } => {
                body.put_u8(TAG_TCP_CHUNK);
                body.put_u8(flags);
                body.put_u32(ev.session);
                body.put_u32(*sequence);
                put_bytes(&mut body, content);
            }
        }

        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);
        Ok(())
    }
}

fn get_u8(buf: &mut BytesMut) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut BytesMut) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut BytesMut) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u32())
}

fn get_bytes(buf: &mut BytesMut) -> Result<Bytes, CodecError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    Ok(buf.split_to(len).freeze())
}

fn get_string(buf: &mut BytesMut) -> Result<String, CodecError> {
    let raw = get_bytes(buf)?;
    Ok(String::from_utf8(raw.to_vec())?)
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.extend_from_slice(data);
}

fn put_string(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(ev: SessionEvent, wrapping: Wrapping) -> SessionEvent {
        let codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode(&mut buf, &ev, wrapping).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn roundtrip_user_login() {
        let ev = SessionEvent {
            session: 0,
            event: Event::UserLogin { user: "alice".into() },
        };
        assert_eq!(roundtrip(ev.clone(), Wrapping::plain()), ev);
    }

    #[test]
    fn roundtrip_tcp_connection() {
        let ev = SessionEvent {
            session: 7,
            event: Event::TcpConnection {
                status: ConnStatus::Closed,
                addr: "example.com:443".into(),
            },
        };
        assert_eq!(roundtrip(ev.clone(), Wrapping::sealed(false)), ev);
    }

    #[test]
    fn roundtrip_http_request() {
        let ev = SessionEvent {
            session: 42,
            event: Event::HttpRequest(HttpRequestEvent {
                method: "GET".into(),
                url: "http://example.com/".into(),
                headers: vec![
                    ("Host".into(), "example.com".into()),
                    ("Accept".into(), "*/*".into()),
                ],
                body: Bytes::new(),
            }),
        };
        assert_eq!(roundtrip(ev.clone(), Wrapping::sealed(false)), ev);
    }

    #[test]
    fn roundtrip_tcp_chunk() {
        let ev = SessionEvent {
            session: 9,
            event: Event::TcpChunk {
                content: Bytes::from_static(b"payload"),
                sequence: 3,
            },
        };
        assert_eq!(roundtrip(ev.clone(), Wrapping::sealed(true)), ev);
    }

    #[test]
    fn decode_multiple_frames() {
        let codec = FrameCodec;
        let mut buf = BytesMut::new();
        for seq in 0..3u32 {
            let ev = SessionEvent {
                session: 1,
                event: Event::TcpChunk {
                    content: Bytes::from(vec![seq as u8; 4]),
                    sequence: seq,
                },
            };
            codec.encode(&mut buf, &ev, Wrapping::plain()).unwrap();
        }
        let mut seen = 0u32;
        while let Some(ev) = codec.decode(&mut buf).unwrap() {
            match ev.event {
                Event::TcpChunk { sequence, .. } => assert_eq!(sequence, seen),
                other => panic!("unexpected event {other:?}"),
            }
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn decode_truncated_frame_is_error() {
        let codec = FrameCodec;
        let ev = SessionEvent {
            session: 1,
            event: Event::UserLogin { user: "bob".into() },
        };
        let mut buf = BytesMut::new();
        codec.encode(&mut buf, &ev, Wrapping::plain()).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Truncated)));
    }

    #[test]
    fn decode_unknown_tag_is_error() {
        let codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(6);
        buf.put_u8(99);
        buf.put_u8(0);
        buf.put_u32(1);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::UnknownTag(99))));
    }

    #[test]
    fn http_request_serialization() {
        let req = HttpRequestEvent {
            method: "POST".into(),
            url: "/submit".into(),
            headers: vec![("Host".into(), "example.com".into())],
            body: Bytes::from_static(b"k=v"),
        };
        let mut out = Vec::new();
        req.write_to(&mut out);
        assert_eq!(
            out,
            b"POST /submit HTTP/1.1\r\nHost: example.com\r\n\r\nk=v"
        );
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header("missing"), None);
    }
}
