//! Authentication is consumed, not implemented: token issuance and OAuth
//! flows live outside this crate. A [`TokenValidator`] is the one seam the
//! dispatcher needs — given the bearer token a client attached to a
//! tool call, decide who they are and what scopes they hold.

use async_trait::async_trait;

/// The caller identity and scopes recovered from a validated token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("missing required scope: {0}")]
    MissingScope(String),
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Checks that `identity` holds every scope in `required`.
pub fn check_scopes(identity: &Identity, required: &[String]) -> Result<(), AuthError> {
    for scope in required {
        if !identity.scopes.iter().any(|s| s == scope) {
            return Err(AuthError::MissingScope(scope.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scope_is_reported_by_name() {
        let identity = Identity {
            user_id: "u1".into(),
            scopes: vec!["read".into()],
        };
        let err = check_scopes(&identity, &["write".into()]).unwrap_err();
        assert!(matches!(err, AuthError::MissingScope(s) if s == "write"));
    }

    #[test]
    fn all_scopes_present_succeeds() {
        let identity = Identity {
            user_id: "u1".into(),
            scopes: vec!["read".into(), "write".into()],
        };
        assert!(check_scopes(&identity, &["read".into(), "write".into()]).is_ok());
    }
}
