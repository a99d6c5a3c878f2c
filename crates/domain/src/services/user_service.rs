use crate::entities::{AccessToken, Credentials, User};
use crate::errors::DomainError;
use crate::repositories::UserRepository;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::sync::Arc;

/// Tracker accounts and their bearer tokens.
pub struct UserService {
    user_repository: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(user_repository: Arc<dyn UserRepository>) -> Self {
        Self { user_repository }
    }

    /// Creates an account and signs it in.
    pub async fn register(&self, credentials: &Credentials) -> Result<AccessToken, DomainError> {
        if credentials.password.is_empty() {
            return Err(DomainError::ValidationError("Password cannot be empty".to_string()));
        }

        let mut user = User::new(credentials.username.trim().to_string(), hash_password(&credentials.password));
        user.validate()?;

        if self.user_repository.find_by_username(&user.username).await?.is_some() {
            return Err(DomainError::UsernameAlreadyExists(user.username));
        }

        user.access_token = Some(new_token());
        let user = self.user_repository.save(&user).await?;
        tracing::info!(username = %user.username, "user registered");

        issued(&user)
    }

    /// Checks the password and rotates the user's token.
    pub async fn login(&self, credentials: &Credentials) -> Result<AccessToken, DomainError> {
        let mut user = self
            .user_repository
            .find_by_username(credentials.username.trim())
            .await?
            .filter(|user| verify_password(&credentials.password, &user.password_hash))
            .ok_or_else(|| DomainError::Unauthorized("Invalid username or password".to_string()))?;

        user.access_token = Some(new_token());
        let user = self.user_repository.update(&user).await?;

        issued(&user)
    }

    /// The user a bearer token belongs to.
    pub async fn authenticate(&self, token: &str) -> Result<User, DomainError> {
        if token.is_empty() {
            return Err(DomainError::Unauthorized("Missing access token".to_string()));
        }
        self.user_repository
            .find_by_token(token)
            .await?
            .ok_or_else(|| DomainError::Unauthorized("Invalid access token".to_string()))
    }
}

fn issued(user: &User) -> Result<AccessToken, DomainError> {
    user.access_token
        .clone()
        .map(AccessToken::bearer)
        .ok_or_else(|| DomainError::RepositoryError("token was not stored".to_string()))
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Salted SHA-1, stored as `<salt hex>$<digest hex>`.
fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", hex::encode(salt), salted_digest(&salt, password))
}

fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, digest)) = stored.split_once('$') else {
        return false;
    };
    match hex::decode(salt_hex) {
        Ok(salt) => salted_digest(&salt, password) == digest,
        Err(_) => false,
    }
}

fn salted_digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
