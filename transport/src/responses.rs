//! Replies and redirected output sent by a BindServer back to the driver.
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "camelCase")]
pub enum Response {
    /// Success. `info` is the protocol version for the handshake, the exit
    /// status for wait/exit-code requests, and zero otherwise.
    Ok(Ack),
    RequestFailed(Failure),
    /// A failure the server caught while executing the request, as opposed to
    /// one it detected up front. Clients treat it like [`Response::RequestFailed`].
    CaughtException(Failure),
    /// One line of debuggee output, pushed asynchronously. May arrive before
    /// the reply to an outstanding request.
    RedirectedStream(RedirectedLine),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Ack {
    pub info: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectedLine {
    pub kind: StreamKind,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl Response {
    pub fn ok(info: i32) -> Self {
        Self::Ok(Ack { info })
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::RequestFailed(Failure {
            reason: reason.into(),
        })
    }

    pub fn caught(reason: impl Into<String>) -> Self {
        Self::CaughtException(Failure {
            reason: reason.into(),
        })
    }

    pub fn redirected(kind: StreamKind, line: impl Into<String>) -> Self {
        Self::RedirectedStream(RedirectedLine {
            kind,
            line: line.into(),
        })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RequestFailed(_) | Self::CaughtException(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::RequestFailed(failure) | Self::CaughtException(failure) => {
                Some(&failure.reason)
            }
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}
