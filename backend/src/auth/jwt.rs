use super::models::Claims;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
}

/// Verifies HS256 bearer tokens issued by the account service.
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() || token.split('.').count() != 3 {
            return Err(JwtError::InvalidToken);
        }

        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => {
                let now = Utc::now().timestamp() as usize;
                log::debug!(
                    "JWT token decoded. User: {}, Exp: {}, Now: {}",
                    token_data.claims.sub,
                    token_data.claims.exp,
                    now
                );

                if token_data.claims.exp < now {
                    log::warn!("JWT token expired. Exp: {}, Now: {}", token_data.claims.exp, now);
                    return Err(JwtError::TokenExpired);
                }
                if token_data.claims.sub.trim().is_empty() {
                    return Err(JwtError::InvalidToken);
                }
                Ok(token_data.claims)
            }
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(JwtError::TokenExpired),
                    jsonwebtoken::errors::ErrorKind::InvalidToken
                    | jsonwebtoken::errors::ErrorKind::InvalidSignature => Err(JwtError::InvalidToken),
                    _ => Err(JwtError::Decoding(err.to_string())),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) fn token_for(secret: &str, sub: &str, ttl_secs: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            email: None,
            exp: (now + ttl_secs) as usize,
            iat: now as usize,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_subject() {
        let service = JwtService::new("secret");
        let claims = service.verify_token(&token_for("secret", "farmer-42", 3600)).unwrap();
        assert_eq!(claims.sub, "farmer-42");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let service = JwtService::new("secret");
        assert!(matches!(
            service.verify_token(&token_for("other", "farmer-42", 3600)),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = JwtService::new("secret");
        assert!(matches!(
            service.verify_token(&token_for("secret", "farmer-42", -3600)),
            Err(JwtError::TokenExpired)
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let service = JwtService::new("secret");
        assert!(matches!(service.verify_token("abc"), Err(JwtError::InvalidToken)));
        assert!(matches!(service.verify_token(""), Err(JwtError::InvalidToken)));
    }
}
