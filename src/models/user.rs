//! User account model and response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    /// Stored lowercase; lookups are case-insensitive.
    pub email: String,
    pub name: String,
    /// None for Telegram-originated accounts (no password login).
    pub password_hash: Option<String>,
    pub is_approved: bool,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub failed_login_attempts: u32,
    pub account_locked_until: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Alternate unique key for accounts created via Telegram.
    pub telegram_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(email: &str, name: &str, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_lowercase(),
            name: name.to_string(),
            password_hash,
            is_approved: false,
            is_admin: false,
            must_change_password: false,
            failed_login_attempts: 0,
            account_locked_until: None,
            approved_at: None,
            telegram_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public view of a user account (no credential material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub is_approved: bool,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UserAccount> for UserResponse {
    fn from(user: &UserAccount) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            is_approved: user.is_approved,
            is_admin: user.is_admin,
            must_change_password: user.must_change_password,
            created_at: user.created_at,
        }
    }
}

impl From<UserAccount> for UserResponse {
    fn from(user: UserAccount) -> Self {
        Self::from(&user)
    }
}

/// Profile data supplied when an account is created from Telegram.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramProfile {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

impl TelegramProfile {
    /// Synthesized email for Telegram-originated accounts.
    pub fn synthesized_email(&self) -> String {
        match &self.username {
            Some(username) => format!("{}@telegram.local", username.to_lowercase()),
            None => format!("{}@telegram.local", self.telegram_id),
        }
    }
}
