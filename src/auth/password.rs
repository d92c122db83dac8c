//! Password hashing and complexity policy.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum password length accepted by the complexity policy.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Validate password complexity.
///
/// Returns the list of rules the password fails, empty when the password is
/// acceptable. Each reason is actionable and safe to surface to the caller.
pub fn validate_complexity(password: &str) -> Vec<String> {
    let mut failures = Vec::new();

    if password.len() < MIN_PASSWORD_LENGTH {
        failures.push(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        ));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        failures.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        failures.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        failures.push("Password must contain at least one digit".to_string());
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        failures.push("Password must contain at least one special character".to_string());
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Passw0rd!").unwrap();
        assert!(verify_password("Passw0rd!", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn complexity_accepts_valid_password() {
        assert!(validate_complexity("Passw0rd!").is_empty());
    }

    #[test]
    fn complexity_itemizes_every_failed_rule() {
        let failures = validate_complexity("abc");
        assert_eq!(failures.len(), 4); // length, uppercase, digit, special
        assert!(failures[0].contains("at least 8"));
    }

    #[test]
    fn complexity_flags_missing_special_character() {
        let failures = validate_complexity("Passw0rd");
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("special"));
    }
}
