use crate::error::VoteError;
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version announced in `welcome`
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        poll_id: PollId,
    },
    LeaveRoom {
        poll_id: PollId,
    },
    /// Fields stay untyped until the validator has looked at them
    Vote {
        #[serde(default)]
        poll_id: Value,
        #[serde(default)]
        option_index: Value,
        #[serde(default)]
        fingerprint: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        connection_id: ConnectionId,
        server_now: String,
    },
    /// Room broadcast after a committed vote
    Update(PollSnapshot),
    /// Private ack to the submitter
    VoteSuccess {
        message: String,
        poll: PollSnapshot,
    },
    /// Private rejection to the submitter
    VoteError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn vote_success(snapshot: PollSnapshot) -> Self {
        ServerMessage::VoteSuccess {
            message: "Vote recorded successfully".to_string(),
            poll: snapshot,
        }
    }
}

impl From<&VoteError> for ServerMessage {
    fn from(err: &VoteError) -> Self {
        ServerMessage::VoteError {
            message: err.client_message(),
            reason: Some(err.reason().to_string()),
            retry_after: err.retry_after_secs(),
        }
    }
}
