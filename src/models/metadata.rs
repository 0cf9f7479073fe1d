//! User metadata attached to objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One key-value metadata entry (e.g. `hash` -> lookup token).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectMetadata {
    /// Reference to the owning object.
    pub object_id: Uuid,

    /// Metadata key.
    pub key: String,

    /// Metadata value as plain text.
    pub value: String,
}
