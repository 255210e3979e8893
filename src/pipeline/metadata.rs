use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates one belt execution across plugin hooks and error reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeltMetadata {
    /// Fresh per execute call unless a composite pipeline threads its own
    pub item_id: Uuid,
    /// Fixed for the lifetime of the belt instance
    pub belt_id: Uuid,
    pub belt_type: String,
}

impl BeltMetadata {
    pub fn new(item_id: Uuid, belt_id: Uuid, belt_type: impl Into<String>) -> Self {
        Self {
            item_id,
            belt_id,
            belt_type: belt_type.into(),
        }
    }
}
