use std::fmt;

use serde::{Deserialize, Serialize};

/// Collection used when the caller does not name one.
pub const DEFAULT_COLLECTION: &str = "default";

/// Anything that can own media.
///
/// Owners are identified by an explicit `(owner_type, owner_id)` pair; the
/// association table keys directly on it.
pub trait Owner {
    fn owner_type(&self) -> &str;

    fn owner_id(&self) -> String;

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(self.owner_type(), self.owner_id())
    }
}

/// A concrete `(owner_type, owner_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: String,
}

impl OwnerRef {
    pub fn new(owner_type: impl Into<String>, owner_id: impl ToString) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.to_string(),
        }
    }
}

impl Owner for OwnerRef {
    fn owner_type(&self) -> &str {
        &self.owner_type
    }

    fn owner_id(&self) -> String {
        self.owner_id.clone()
    }

    fn owner_ref(&self) -> OwnerRef {
        self.clone()
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}
