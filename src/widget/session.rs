use uuid::Uuid;

/// Per-widget session identity. Created once at activation and used only
/// to tell the local user's messages apart; it authenticates nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    self_id: String,
}

impl SessionContext {
    /// Generates a fresh `User_<uuid>` label.
    pub fn activate() -> Self {
        Self::with_id(format!("User_{}", Uuid::new_v4().simple()))
    }

    pub fn with_id(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }
}
