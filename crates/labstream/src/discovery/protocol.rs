// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery wire protocol: probe and reply datagrams.
//!
//! Both messages are line-framed text with CRLF separators:
//!
//! ```text
//! probe:   LSP:shortinfo\r\n<query>\r\n<reply_port> <query_id>\r\n
//! reply:   LSP:resultinfo\r\n<query_id>\r\n<descriptor as JSON>
//! ```
//!
//! The query id ties replies back to the attempt that asked; replies that
//! answer a different probe (late packets from an earlier wave, or another
//! resolver on the same machine) are ignored by the receive loop. Providers
//! send the reply to the probe's source address at the advertised
//! `reply_port`.

use crate::discovery::stream_info::StreamInfo;

const PROBE_HEADER: &str = "LSP:shortinfo";
const REPLY_HEADER: &str = "LSP:resultinfo";

/// A decoded probe datagram, as seen by a stream provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    /// The resolver's query predicate.
    pub query: String,
    /// UDP port on the prober's host that awaits replies.
    pub reply_port: u16,
    /// Opaque id echoed back in the reply.
    pub query_id: u32,
}

/// A decoded reply datagram, as seen by a resolve attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    /// Query id this reply answers.
    pub query_id: u32,
    /// The advertised stream descriptor.
    pub info: StreamInfo,
}

/// Errors raised while decoding discovery datagrams.
///
/// Decode failures are never fatal: the receive loop drops the datagram and
/// keeps listening.
#[derive(Debug)]
pub enum ProtocolError {
    /// The datagram does not follow the framing above.
    Malformed(&'static str),
    /// The descriptor body failed to deserialize.
    BadDescriptor(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(s) => write!(f, "malformed datagram: {}", s),
            Self::BadDescriptor(s) => write!(f, "bad descriptor: {}", s),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Compose a probe datagram carrying `query` and the reply address.
pub fn encode_probe(query: &str, reply_port: u16, query_id: u32) -> Vec<u8> {
    format!(
        "{}\r\n{}\r\n{} {}\r\n",
        PROBE_HEADER, query, reply_port, query_id
    )
    .into_bytes()
}

/// Decode a probe datagram.
pub fn decode_probe(data: &[u8]) -> Result<ProbeRequest, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::Malformed("not UTF-8"))?;
    let mut lines = text.split("\r\n");
    match lines.next() {
        Some(PROBE_HEADER) => {}
        _ => return Err(ProtocolError::Malformed("missing probe header")),
    }
    let query = lines
        .next()
        .ok_or(ProtocolError::Malformed("missing query line"))?
        .to_string();
    let control = lines
        .next()
        .ok_or(ProtocolError::Malformed("missing control line"))?;
    let mut parts = control.split_ascii_whitespace();
    let reply_port = parts
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or(ProtocolError::Malformed("bad reply port"))?;
    let query_id = parts
        .next()
        .and_then(|q| q.parse::<u32>().ok())
        .ok_or(ProtocolError::Malformed("bad query id"))?;
    Ok(ProbeRequest {
        query,
        reply_port,
        query_id,
    })
}

/// Compose a reply datagram advertising `info` in answer to `query_id`.
pub fn encode_reply(query_id: u32, info: &StreamInfo) -> Result<Vec<u8>, ProtocolError> {
    let body =
        serde_json::to_string(info).map_err(|e| ProtocolError::BadDescriptor(e.to_string()))?;
    Ok(format!("{}\r\n{}\r\n{}", REPLY_HEADER, query_id, body).into_bytes())
}

/// Decode a reply datagram into `(query_id, descriptor)`.
pub fn decode_reply(data: &[u8]) -> Result<ReplyMessage, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::Malformed("not UTF-8"))?;
    let mut lines = text.splitn(3, "\r\n");
    match lines.next() {
        Some(REPLY_HEADER) => {}
        _ => return Err(ProtocolError::Malformed("missing reply header")),
    }
    let query_id = lines
        .next()
        .and_then(|q| q.trim().parse::<u32>().ok())
        .ok_or(ProtocolError::Malformed("bad query id"))?;
    let body = lines
        .next()
        .ok_or(ProtocolError::Malformed("missing descriptor body"))?;
    let info: StreamInfo =
        serde_json::from_str(body).map_err(|e| ProtocolError::BadDescriptor(e.to_string()))?;
    Ok(ReplyMessage { query_id, info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::stream_info::test_stream;

    #[test]
    fn test_probe_roundtrip() {
        let bytes = encode_probe("type='EEG'", 49152, 0xDEAD_BEEF);
        let probe = decode_probe(&bytes).unwrap();
        assert_eq!(probe.query, "type='EEG'");
        assert_eq!(probe.reply_port, 49152);
        assert_eq!(probe.query_id, 0xDEAD_BEEF);
    }

    #[test]
    fn test_reply_roundtrip() {
        let info = test_stream("uid-7");
        let bytes = encode_reply(42, &info).unwrap();
        let reply = decode_reply(&bytes).unwrap();
        assert_eq!(reply.query_id, 42);
        assert_eq!(reply.info, info);
    }

    #[test]
    fn test_decode_rejects_foreign_traffic() {
        assert!(decode_reply(b"RTPS\x02\x01\x01\x02junk").is_err());
        assert!(decode_reply(b"LSP:shortinfo\r\nx\r\n1 2\r\n").is_err());
        assert!(decode_probe(b"LSP:resultinfo\r\n1\r\n{}").is_err());
        assert!(decode_probe(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_decode_reply_with_bad_body() {
        let bytes = b"LSP:resultinfo\r\n42\r\n{not json";
        assert!(matches!(
            decode_reply(bytes),
            Err(ProtocolError::BadDescriptor(_))
        ));
    }

    #[test]
    fn test_query_with_crlf_is_rejected_cleanly() {
        // A query containing the frame separator cannot round-trip; the
        // decoder sees a short control line and errors out.
        let bytes = encode_probe("type='EEG'\r\nextra", 1000, 1);
        assert!(decode_probe(&bytes).is_err());
    }
}
