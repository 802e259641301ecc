//! OCPP protocol version negotiated on a device link

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    V16,
    /// OCPP 2.0.1
    V201,
}

impl OcppVersion {
    /// Versions the WebSocket endpoint accepts, in order of preference.
    pub const SUPPORTED: &'static [OcppVersion] = &[OcppVersion::V16];

    /// `Sec-WebSocket-Protocol` token for this version.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
        }
    }

    pub fn from_subprotocol(s: &str) -> Option<Self> {
        match s.trim() {
            "ocpp1.6" => Some(Self::V16),
            "ocpp2.0.1" => Some(Self::V201),
            _ => None,
        }
    }

    /// Pick the first supported version out of a comma separated
    /// `Sec-WebSocket-Protocol` header.
    pub fn negotiate(header: &str) -> Option<Self> {
        let offered: Vec<OcppVersion> = header
            .split(',')
            .filter_map(Self::from_subprotocol)
            .collect();
        Self::SUPPORTED
            .iter()
            .copied()
            .find(|v| offered.contains(v))
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V16 => write!(f, "1.6"),
            Self::V201 => write!(f, "2.0.1"),
        }
    }
}
