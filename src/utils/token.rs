use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

pub fn decode_token<T: Into<String>>(token: T, secret: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
    let decoded = decode::<TokenClaims>(
        &token.into(),
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )?;

    Ok(decoded.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_token(user_id: &str, secret: &[u8], expires_in_seconds: i64) -> String {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::seconds(expires_in_seconds)).timestamp() as usize,
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = create_token("0b6f0e44-2f5b-4bb5-9d53-2a0b0d6d4e0f", b"right", 60);
        assert!(decode_token(token.clone(), b"wrong").is_err());
        assert_eq!(
            decode_token(token, b"right").unwrap(),
            "0b6f0e44-2f5b-4bb5-9d53-2a0b0d6d4e0f"
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_token("user", b"secret", -3600);
        assert!(decode_token(token, b"secret").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_token("not-a-jwt", b"secret").is_err());
    }
}
