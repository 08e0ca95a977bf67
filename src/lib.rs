//! Finished-workout payloads: encode on the wearable, stage for transfer,
//! and reconcile delivered files into an inbox on the companion device.

pub mod cli;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod gpx;
pub mod inbox;
pub mod staging;
pub mod types;
pub mod utils;

pub use codec::{decode, encode};
pub use envelope::{TransferMetadata, make_metadata};
pub use error::{DecodeError, EncodeError, StagingError};
pub use inbox::{Inbox, ReloadReport, Snapshot};
pub use staging::{StagingDirs, StagingStore};
pub use types::{KilometerSplit, RoutePoint, SCHEMA_VERSION, TimedSample, WorkoutPayload};
