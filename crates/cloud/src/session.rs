//! In-memory auth session holder.

use std::sync::RwLock;

use clipvault_upload::cloud::SessionProvider;

/// Holds the current bearer credential (thread-safe).
///
/// The auth layer updates the token on sign-in/refresh/sign-out; the queue
/// and API client read it through [`SessionProvider`].
#[derive(Default)]
pub struct AuthSession {
    token: RwLock<Option<String>>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fresh credential (sign-in or token refresh).
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap() = Some(token.into());
    }

    /// Clears the credential (sign-out).
    pub fn clear(&self) {
        *self.token.write().unwrap() = None;
    }
}

impl SessionProvider for AuthSession {
    fn is_authenticated(&self) -> bool {
        self.token.read().unwrap().is_some()
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_signed_out() {
        let session = AuthSession::new();
        assert!(!session.is_authenticated());
        assert!(session.bearer_token().is_none());
    }

    #[test]
    fn set_and_clear_token() {
        let session = AuthSession::new();
        session.set_token("jwt-abc");
        assert!(session.is_authenticated());
        assert_eq!(session.bearer_token().as_deref(), Some("jwt-abc"));

        session.clear();
        assert!(!session.is_authenticated());
    }
}
