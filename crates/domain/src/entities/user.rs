use serde::{Deserialize, Serialize};

/// Tracker account. Peers announce on behalf of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i32>, // None for new users before persistence
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

impl User {
    pub fn new(username: String, password_hash: String) -> Self {
        Self {
            id: None,
            username,
            password_hash,
            access_token: None,
        }
    }

    pub fn validate(&self) -> Result<(), crate::DomainError> {
        if self.username.trim().is_empty() {
            return Err(crate::DomainError::ValidationError("Username cannot be empty".to_string()));
        }

        if self.password_hash.is_empty() {
            return Err(crate::DomainError::ValidationError("Password cannot be empty".to_string()));
        }

        Ok(())
    }
}
