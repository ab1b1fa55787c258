use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub ok: bool,
    pub msg: String,
}

impl Ack {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            ok: true,
            msg: msg.into(),
        }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            msg: msg.into(),
        }
    }
}

/// Optional body of an acquire call. Without `ttl_ms` the front's default lease ttl applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireRequest {
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetsQuery {
    pub port: u16,
}

/// Error payload returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub const CODE_UNBOUND: &str = "unbound";
pub const CODE_DEADLINE_EXCEEDED: &str = "deadline_exceeded";
pub const CODE_PROBE_TIMEOUT: &str = "probe_timeout";
pub const CODE_DEVICE_QUERY_FAILED: &str = "device_query_failed";
pub const CODE_UNKNOWN_PEER: &str = "unknown_peer";
pub const CODE_INTERNAL: &str = "internal";
pub const CODE_INVALID_REQUEST: &str = "invalid_request";

/// Relative deadline header a caller may attach to any request.
pub const DEADLINE_HEADER: &str = "x-deadline-ms";
