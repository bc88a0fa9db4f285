/// Supplies the user identifier attached to outbound prompt requests.
pub trait SessionProvider: Send + Sync {
    fn user_id(&self) -> Option<String>;
}

/// Fixed user identity, or none for anonymous requests.
#[derive(Clone, Debug, Default)]
pub struct StaticSession {
    user_id: Option<String>,
}

impl StaticSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: Some(user_id).filter(|id| !id.trim().is_empty()),
        }
    }
}

impl SessionProvider for StaticSession {
    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}
