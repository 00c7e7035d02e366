//! Explicit authentication context, passed to every history call.

use serde::{Deserialize, Serialize};

/// Who is signed in, if anyone. Authentication itself happens elsewhere;
/// this only carries its result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    owner_id: Option<String>,
}

impl SessionContext {
    /// A signed-in session. Blank ids count as signed out.
    pub fn authenticated(owner_id: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let trimmed = owner_id.trim();
        Self {
            owner_id: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.owner_id.is_some()
    }
}
