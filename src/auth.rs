// src/auth.rs
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Issue a signed token for `user_id`, valid for `days` days.
pub fn create_token(
    user_id: &str,
    secret: &str,
    days: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::days(days)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Verify a token and return the user id it was issued for.
pub fn verify_token(token: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(data.claims.sub)
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a password with a fresh random salt. Stored as `salt$digest`.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::thread_rng().gen();
    format!("{}${}", hex::encode(salt), digest(&salt, password))
}

/// Check a password against a stored `salt$digest` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(2, '$');
    let (salt_hex, expected) = match (parts.next(), parts.next()) {
        (Some(s), Some(d)) => (s, d),
        _ => return false,
    };
    let salt = match hex::decode(salt_hex) {
        Ok(s) => s,
        Err(_) => return false,
    };
    digest(&salt, password) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = create_token("user-1", "secret", 7).unwrap();
        assert_eq!(verify_token(&token, "secret").unwrap(), "user-1");
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let token = create_token("user-1", "secret", 7).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter22");
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn same_password_hashes_differently() {
        assert_ne!(hash_password("pw"), hash_password("pw"));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("pw", "not-a-hash"));
        assert!(!verify_password("pw", "zz$deadbeef"));
    }
}
