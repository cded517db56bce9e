use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::StoreError;

/// Stack size for the hashing thread; argon2 overflows the default
/// stack of test threads in debug builds.
const HASH_STACK_SIZE: usize = 4 * 1024 * 1024;

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let password = password.to_string();
    std::thread::Builder::new()
        .stack_size(HASH_STACK_SIZE)
        .spawn(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| StoreError::Hashing(e.to_string()))
        })
        .map_err(|e| StoreError::Hashing(format!("spawn: {e}")))?
        .join()
        .map_err(|_| StoreError::Hashing("hash thread panicked".into()))?
}

/// Check an attempt against a stored PHC string. Malformed hashes never verify.
pub fn verify_password(attempt: &str, stored: &str) -> bool {
    let attempt = attempt.to_string();
    let stored = stored.to_string();
    std::thread::Builder::new()
        .stack_size(HASH_STACK_SIZE)
        .spawn(move || {
            PasswordHash::new(&stored)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(attempt.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false)
        })
        .ok()
        .and_then(|handle| handle.join().ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("pw", "not-a-phc-string"));
    }
}
