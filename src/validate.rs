//! Shape and type checks for inbound votes.
//!
//! Inputs are raw JSON values so that a string `optionIndex` or a numeric
//! fingerprint is reported as `invalid_request` instead of a parse error.
//! Range checks against the option count happen later, once the poll is loaded.

use crate::error::{VoteError, VoteResult};
use crate::types::{Fingerprint, OriginAddress, PollId};
use serde_json::Value;

/// A vote that passed validation, ready for dedup and commit
#[derive(Debug, Clone, PartialEq)]
pub struct VoteRequest {
    pub poll_id: PollId,
    pub option_index: i64,
    pub fingerprint: Option<Fingerprint>,
    /// Always derived server-side
    pub origin: OriginAddress,
}

pub fn validate(
    poll_id: &Value,
    option_index: &Value,
    fingerprint: Option<&Value>,
    origin: OriginAddress,
) -> VoteResult<VoteRequest> {
    let poll_id = match poll_id {
        Value::String(s) if !s.is_empty() => s,
        _ => return Err(VoteError::InvalidRequest("Invalid poll ID format".into())),
    };
    if !is_poll_id(poll_id) {
        return Err(VoteError::InvalidRequest("Invalid poll ID".into()));
    }

    let option_index = integer(option_index)
        .ok_or_else(|| VoteError::InvalidRequest("Invalid option index".into()))?;

    let fingerprint = match fingerprint {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(VoteError::InvalidRequest(
                "Invalid fingerprint format".into(),
            ))
        }
    };

    Ok(VoteRequest {
        poll_id: poll_id.clone(),
        option_index,
        fingerprint,
        origin,
    })
}

/// Poll ids are ULIDs
pub fn is_poll_id(id: &str) -> bool {
    ulid::Ulid::from_string(id).is_ok()
}

/// Any JSON number with no fractional part. Values beyond `i64` saturate,
/// which the range check then rejects as an unknown option.
fn integer(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.as_u64().is_some() {
        return Some(i64::MAX);
    }
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}
