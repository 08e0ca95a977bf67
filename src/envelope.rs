//! Routing metadata handed to the transport next to a staged file.
//!
//! The envelope is a label, not a source of truth: receivers decode the file
//! and check the envelope against it with [`TransferMetadata::verify`].

use crate::error::StagingError;
use crate::types::WorkoutPayload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const WORKOUT_KIND: &str = "workout";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

pub fn make_metadata(payload: &WorkoutPayload) -> TransferMetadata {
    TransferMetadata {
        kind: WORKOUT_KIND.to_string(),
        id: payload.id.to_string(),
    }
}

impl TransferMetadata {
    /// Fails unless this envelope labels `payload`.
    pub fn verify(&self, payload: &WorkoutPayload) -> Result<(), StagingError> {
        if self.kind != WORKOUT_KIND {
            return Err(StagingError::EnvelopeMismatch {
                expected: format!("type={WORKOUT_KIND}"),
                found: format!("type={}", self.kind),
            });
        }

        // Parse rather than compare text so upper-case UUIDs still match.
        match Uuid::parse_str(&self.id) {
            Ok(id) if id == payload.id => Ok(()),
            _ => Err(StagingError::EnvelopeMismatch {
                expected: format!("id={}", payload.id),
                found: format!("id={}", self.id),
            }),
        }
    }

    /// Flat string map, the shape most transports accept as user info.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), self.kind.clone()),
            ("id".to_string(), self.id.clone()),
        ])
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            kind: map.get("type")?.clone(),
            id: map.get("id")?.clone(),
        })
    }
}
