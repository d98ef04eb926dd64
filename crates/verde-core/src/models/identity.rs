//! Signed-in identity as seen by the core.

use serde::{Deserialize, Serialize};

/// Stable identifier and display email of the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

/// Read-only source of the current identity; `None` while signed out.
pub trait IdentityProvider: Send + Sync + 'static {
    fn current_identity(&self) -> Option<Identity>;
}

/// Identity fixed at construction time (CLI profiles, tests).
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    pub fn new(user_id: Option<String>, email: Option<String>) -> Self {
        let user_id = crate::util::normalize_text_option(user_id);
        Self(user_id.map(|user_id| Identity {
            user_id,
            email: crate::util::normalize_text_option(email),
        }))
    }

    pub const fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_user_id_means_signed_out() {
        let identity = StaticIdentity::new(Some("  ".to_string()), Some("a@b.c".to_string()));
        assert_eq!(identity.current_identity(), None);
    }

    #[test]
    fn static_identity_trims_values() {
        let identity = StaticIdentity::new(Some(" u1 ".to_string()), Some(" ".to_string()));
        assert_eq!(
            identity.current_identity(),
            Some(Identity {
                user_id: "u1".to_string(),
                email: None,
            })
        );
    }
}
