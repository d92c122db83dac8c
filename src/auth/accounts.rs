//! Account lifecycle and authentication with failed-attempt lockout.
//!
//! Per-account state machine: an account is `Active` while its consecutive
//! failed-attempt counter is below [`MAX_LOGIN_ATTEMPTS`], and `Locked` once
//! the counter reaches the limit (for [`LOCKOUT_MINUTES`]). The unlock is
//! lazy: the next authentication attempt after the window elapses clears the
//! lock and resets the counter. Unapproved accounts never authenticate,
//! independent of the lockout machine.
//!
//! Failed attempts are persisted before the error is returned, so a crash
//! between attempts cannot reset the counter.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::auth::password;
use crate::models::{TelegramProfile, UserAccount};
use crate::store::{RecordStore, StoreError};

/// Consecutive failed password checks before an account locks.
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// How long an account stays locked after exceeding the attempt limit.
pub const LOCKOUT_MINUTES: i64 = 15;

/// Collection holding user accounts.
pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("account not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("account is pending approval")]
    NotApproved,

    #[error("an account with this email already exists")]
    DuplicateAccount,

    #[error("password does not meet requirements")]
    WeakPassword(Vec<String>),

    #[error("the last admin account cannot be deleted")]
    LastAdminProtected,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AccountManager {
    store: Arc<RecordStore>,
    /// Verified against when no account (or no password) exists, so unknown
    /// emails and wrong passwords share one outward error and timing profile.
    dummy_hash: String,
}

impl AccountManager {
    pub fn new(store: Arc<RecordStore>) -> Result<Self, AuthError> {
        let dummy_hash = password::hash_password(&uuid::Uuid::new_v4().to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(Self { store, dummy_hash })
    }

    /// Create the default admin account if the user collection is empty.
    /// The bootstrap admin must change its password on first login.
    pub async fn ensure_admin(&self, email: &str, admin_password: &str) -> Result<bool, AuthError> {
        let password_hash = password::hash_password(admin_password)
            .map_err(|e| AuthError::Hash(e.to_string()))?;

        let created = self
            .store
            .update(USERS_COLLECTION, |users: &mut Vec<UserAccount>| {
                if !users.is_empty() {
                    return Ok::<_, AuthError>(false);
                }
                let mut admin = UserAccount::new(email, "Administrator", Some(password_hash));
                admin.is_admin = true;
                admin.is_approved = true;
                admin.approved_at = Some(Utc::now());
                admin.must_change_password = true;
                users.push(admin);
                Ok(true)
            })
            .await?;

        if created {
            info!(email = %email, "Created bootstrap admin account");
        }
        Ok(created)
    }

    /// Register a new account. Unapproved and non-admin by default.
    pub async fn register(
        &self,
        email: &str,
        plain_password: &str,
        name: &str,
    ) -> Result<UserAccount, AuthError> {
        let failures = password::validate_complexity(plain_password);
        if !failures.is_empty() {
            return Err(AuthError::WeakPassword(failures));
        }

        let password_hash = password::hash_password(plain_password)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        let email_lc = email.to_lowercase();
        let name = name.to_string();

        self.store
            .update(USERS_COLLECTION, move |users: &mut Vec<UserAccount>| {
                if users.iter().any(|u| u.email == email_lc) {
                    return Err(AuthError::DuplicateAccount);
                }
                let account = UserAccount::new(&email_lc, &name, Some(password_hash));
                users.push(account.clone());
                Ok(account)
            })
            .await
    }

    /// Authenticate an email/password pair, driving the lockout machine.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller;
    /// the distinction only reaches the security audit log.
    pub async fn authenticate(
        &self,
        email: &str,
        plain_password: &str,
    ) -> Result<UserAccount, AuthError> {
        let email_lc = email.to_lowercase();
        let dummy_hash = self.dummy_hash.clone();
        let plain = plain_password.to_string();

        // The closure reports its outcome as a value so that counter updates
        // are written back even when authentication fails.
        let outcome = self
            .store
            .update(USERS_COLLECTION, move |users: &mut Vec<UserAccount>| {
                Ok::<_, AuthError>(Self::check_credentials(users, &email_lc, &plain, &dummy_hash))
            })
            .await?;
        outcome
    }

    fn check_credentials(
        users: &mut [UserAccount],
        email_lc: &str,
        plain_password: &str,
        dummy_hash: &str,
    ) -> Result<UserAccount, AuthError> {
        let now = Utc::now();

        let Some(account) = users.iter_mut().find(|u| u.email == email_lc) else {
            // Burn a verification anyway so the failure timing matches.
            password::verify_password(plain_password, dummy_hash);
            return Err(AuthError::InvalidCredentials);
        };

        if let Some(until) = account.account_locked_until {
            if now < until {
                return Err(AuthError::AccountLocked { until });
            }
            // Lockout window elapsed: lazy unlock.
            account.account_locked_until = None;
            account.failed_login_attempts = 0;
            account.updated_at = now;
        }

        let verified = match &account.password_hash {
            Some(hash) => password::verify_password(plain_password, hash),
            None => {
                password::verify_password(plain_password, dummy_hash);
                false
            }
        };

        if !verified {
            account.failed_login_attempts += 1;
            account.updated_at = now;
            if account.failed_login_attempts >= MAX_LOGIN_ATTEMPTS {
                let until = now + Duration::minutes(LOCKOUT_MINUTES);
                account.account_locked_until = Some(until);
                return Err(AuthError::AccountLocked { until });
            }
            return Err(AuthError::InvalidCredentials);
        }

        account.failed_login_attempts = 0;
        account.account_locked_until = None;
        account.updated_at = now;

        if !account.is_approved {
            return Err(AuthError::NotApproved);
        }

        Ok(account.clone())
    }

    /// Approve an account. Idempotent; the approval timestamp is recorded on
    /// the first approval only.
    pub async fn approve(&self, email: &str) -> Result<UserAccount, AuthError> {
        let email_lc = email.to_lowercase();
        self.store
            .update(USERS_COLLECTION, move |users: &mut Vec<UserAccount>| {
                let account = users
                    .iter_mut()
                    .find(|u| u.email == email_lc)
                    .ok_or(AuthError::NotFound)?;
                if !account.is_approved {
                    account.is_approved = true;
                    account.approved_at = Some(Utc::now());
                    account.updated_at = Utc::now();
                }
                Ok(account.clone())
            })
            .await
    }

    /// Change an account's password. The current password is required unless
    /// the account is flagged for a forced first-login change.
    pub async fn change_password(
        &self,
        email: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<UserAccount, AuthError> {
        let failures = password::validate_complexity(new_password);
        if !failures.is_empty() {
            return Err(AuthError::WeakPassword(failures));
        }
        let new_hash = password::hash_password(new_password)
            .map_err(|e| AuthError::Hash(e.to_string()))?;

        let email_lc = email.to_lowercase();
        let current = current_password.to_string();

        self.store
            .update(USERS_COLLECTION, move |users: &mut Vec<UserAccount>| {
                let account = users
                    .iter_mut()
                    .find(|u| u.email == email_lc)
                    .ok_or(AuthError::NotFound)?;

                if !account.must_change_password {
                    let ok = account
                        .password_hash
                        .as_deref()
                        .map(|hash| password::verify_password(&current, hash))
                        .unwrap_or(false);
                    if !ok {
                        return Err(AuthError::InvalidCredentials);
                    }
                }

                account.password_hash = Some(new_hash);
                account.must_change_password = false;
                account.updated_at = Utc::now();
                Ok(account.clone())
            })
            .await
    }

    /// Delete an account, refusing to remove the sole approved admin.
    /// Returns the deleted account so the caller can revoke its sessions.
    pub async fn delete_account(&self, email: &str) -> Result<UserAccount, AuthError> {
        let email_lc = email.to_lowercase();
        self.store
            .update(USERS_COLLECTION, move |users: &mut Vec<UserAccount>| {
                let index = users
                    .iter()
                    .position(|u| u.email == email_lc)
                    .ok_or(AuthError::NotFound)?;

                if users[index].is_admin && users[index].is_approved {
                    let admins = users.iter().filter(|u| u.is_admin && u.is_approved).count();
                    if admins <= 1 {
                        return Err(AuthError::LastAdminProtected);
                    }
                }
                Ok(users.remove(index))
            })
            .await
    }

    /// Create or fetch the account for a Telegram profile. Idempotent on the
    /// Telegram id; new accounts are auto-approved and passwordless.
    pub async fn upsert_telegram_account(
        &self,
        profile: TelegramProfile,
    ) -> Result<UserAccount, AuthError> {
        self.store
            .update(USERS_COLLECTION, move |users: &mut Vec<UserAccount>| {
                if let Some(existing) = users
                    .iter()
                    .find(|u| u.telegram_id == Some(profile.telegram_id))
                {
                    return Ok::<_, AuthError>(existing.clone());
                }
                let mut account =
                    UserAccount::new(&profile.synthesized_email(), &profile.first_name, None);
                account.is_approved = true;
                account.approved_at = Some(Utc::now());
                account.telegram_id = Some(profile.telegram_id);
                users.push(account.clone());
                Ok(account)
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<UserAccount>, AuthError> {
        Ok(self.store.read(USERS_COLLECTION).await?)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserAccount>, AuthError> {
        let users: Vec<UserAccount> = self.store.read(USERS_COLLECTION).await?;
        Ok(users.into_iter().find(|u| u.id == id))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, AuthError> {
        let email_lc = email.to_lowercase();
        let users: Vec<UserAccount> = self.store.read(USERS_COLLECTION).await?;
        Ok(users.into_iter().find(|u| u.email == email_lc))
    }
}
