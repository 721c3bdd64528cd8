//! Authorization header values for upstream and collector requests

/// Supplies the value of the `Authorization` header
pub trait TokenProvider: Send + Sync {
    /// `None` when no token is currently available
    fn token(&self) -> Option<String>;
}

/// A token fixed at configuration time
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}
