mod token;

pub use token::Token;

use serde::{Deserialize, Serialize};

use crate::error::{DoraError, Result};

/// Names the environment variable holding a PAT or GitHub token.
///
/// Settings persist the reference only; the secret is resolved at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(env_var: impl Into<String>) -> Self {
        Self(env_var.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// An empty reference means anonymous access (public GitHub repos).
    pub fn resolve(&self) -> Result<Option<Token>> {
        if self.is_empty() {
            return Ok(None);
        }

        match std::env::var(&self.0) {
            Ok(value) if !value.is_empty() => Ok(Some(Token::from(value))),
            _ => Err(DoraError::Authentication(format!(
                "credential variable '{}' is not set",
                self.0
            ))),
        }
    }
}
