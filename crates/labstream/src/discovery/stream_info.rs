// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream descriptors exchanged during discovery.

use serde::{Deserialize, Serialize};

/// Value of a descriptor field, as seen by the query evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Textual field (name, type, uid, ...)
    Str(String),
    /// Integer field (channel_count, ports, ...)
    Int(i64),
    /// Floating-point field (nominal_srate, created_at)
    Float(f64),
}

/// Full descriptive record of a discovered stream.
///
/// Advertised by stream providers in discovery replies. The `uid` is the
/// stable identity of a stream: two replies with equal uids describe the
/// same stream, regardless of which endpoint or wave produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Human-readable stream name (e.g. "BioSemi").
    pub name: String,
    /// Content type (e.g. "EEG", "Markers").
    #[serde(rename = "type")]
    pub stream_type: String,
    /// Number of channels per sample.
    pub channel_count: u32,
    /// Nominal sampling rate in Hz (0.0 for irregular streams).
    pub nominal_srate: f64,
    /// Channel sample format (e.g. "float32", "string").
    pub channel_format: String,
    /// Provider-assigned source identifier, stable across restarts.
    #[serde(default)]
    pub source_id: String,
    /// Unique identifier of this stream instance.
    pub uid: String,
    /// Session ID the provider was configured with.
    pub session_id: String,
    /// Host name of the providing machine.
    pub hostname: String,
    /// TCP port serving sample data.
    pub data_port: u16,
    /// UDP port serving service requests (shortinfo, time probes).
    pub service_port: u16,
    /// Discovery protocol version spoken by the provider.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    /// Creation time of the stream on the provider's clock.
    #[serde(default)]
    pub created_at: f64,
}

fn default_protocol_version() -> u32 {
    110
}

impl StreamInfo {
    /// The stable identity of this stream.
    pub fn key(&self) -> &str {
        &self.uid
    }

    /// Look up a descriptor field by its query-language name.
    ///
    /// Returns `None` for properties this descriptor does not carry; the
    /// query evaluator treats comparisons against missing fields as false.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::Str(self.name.clone())),
            "type" => Some(FieldValue::Str(self.stream_type.clone())),
            "channel_count" => Some(FieldValue::Int(i64::from(self.channel_count))),
            "nominal_srate" => Some(FieldValue::Float(self.nominal_srate)),
            "channel_format" => Some(FieldValue::Str(self.channel_format.clone())),
            "source_id" => Some(FieldValue::Str(self.source_id.clone())),
            "uid" => Some(FieldValue::Str(self.uid.clone())),
            "session_id" => Some(FieldValue::Str(self.session_id.clone())),
            "hostname" => Some(FieldValue::Str(self.hostname.clone())),
            "protocol_version" => Some(FieldValue::Int(i64::from(self.protocol_version))),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_stream(uid: &str) -> StreamInfo {
    StreamInfo {
        name: "BioSemi".into(),
        stream_type: "EEG".into(),
        channel_count: 32,
        nominal_srate: 512.0,
        channel_format: "float32".into(),
        source_id: "bs-325".into(),
        uid: uid.into(),
        session_id: "default".into(),
        hostname: "lab-pc-1".into(),
        data_port: 16573,
        service_port: 16574,
        protocol_version: 110,
        created_at: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup() {
        let info = test_stream("uid-1");
        assert_eq!(info.field("type"), Some(FieldValue::Str("EEG".into())));
        assert_eq!(info.field("channel_count"), Some(FieldValue::Int(32)));
        assert_eq!(info.field("no_such_field"), None);
    }

    #[test]
    fn test_serde_roundtrip_renames_type() {
        let info = test_stream("uid-2");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"type\":\"EEG\""));
        let back: StreamInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
