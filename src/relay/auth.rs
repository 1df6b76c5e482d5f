//! # Relay Authentication
//!
//! Handshake-time bearer credentials. A connection presents its token either
//! as the handshake auth field (`?token=...`) or as an
//! `Authorization: Bearer <token>` header; the auth field is preferred.
//! Tokens are HS256 JWTs verified against a shared secret.
//!
//! The verified identity is attached to the connection for logging only: any
//! authenticated identity may subscribe, publish or command any device id.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication failures. All of them close the connection.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither the auth field nor the Authorization header carried a token
    #[error("missing bearer token")]
    MissingToken,

    /// The relay has no shared secret configured
    #[error("no verification secret configured")]
    MissingSecret,

    /// Signature, expiry or claim validation failed
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Claims carried by relay tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiry, checked when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
}

/// Verified identity of a relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Capability to turn a token into an identity.
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` against `secret`.
    fn verify(&self, token: &str, secret: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct JwtVerifier;

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str, secret: &str) -> Result<Identity, AuthError> {
        let key = DecodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims.into())
    }
}

/// Pick the bearer token out of the handshake.
///
/// # Examples
///
/// ```
/// use drone_link::relay::auth::extract_token;
///
/// assert_eq!(extract_token(None, Some("bearer abc")), Some("abc".to_string()));
/// assert_eq!(extract_token(Some("xyz"), Some("Bearer abc")), Some("xyz".to_string()));
/// assert_eq!(extract_token(None, None), None);
/// ```
pub fn extract_token(auth_field: Option<&str>, authorization: Option<&str>) -> Option<String> {
    if let Some(token) = auth_field.filter(|token| !token.is_empty()) {
        return Some(token.to_string());
    }

    let header = authorization?.trim();
    let token = match (header.get(..6), header.get(6..)) {
        (Some(prefix), Some(rest))
            if prefix.eq_ignore_ascii_case("bearer")
                && (rest.is_empty() || rest.starts_with(char::is_whitespace)) =>
        {
            rest.trim()
        }
        _ => header,
    };
    (!token.is_empty()).then(|| token.to_string())
}

/// Full handshake check: extract, then verify.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] or [`AuthError::MissingSecret`] before
/// consulting the verifier, otherwise whatever the verifier reports.
pub fn authenticate(
    verifier: &dyn TokenVerifier,
    secret: Option<&str>,
    auth_field: Option<&str>,
    authorization: Option<&str>,
) -> Result<Identity, AuthError> {
    let token = extract_token(auth_field, authorization).ok_or(AuthError::MissingToken)?;
    let secret = secret.filter(|s| !s.is_empty()).ok_or(AuthError::MissingSecret)?;
    verifier.verify(&token, secret)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use mockall::predicate::eq;

    /// Sign a token that expires in an hour.
    pub(crate) fn sign(sub: &str, secret: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            email: Some(format!("{}@example.com", sub)),
            role: Some("pilot".to_string()),
            exp: Some((chrono::Utc::now().timestamp() + 3600) as usize),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_extract_prefers_auth_field() {
        assert_eq!(extract_token(Some("field"), Some("Bearer header")), Some("field".to_string()));
    }

    #[test]
    fn test_extract_empty_auth_field_falls_back_to_header() {
        assert_eq!(extract_token(Some(""), Some("Bearer header")), Some("header".to_string()));
    }

    #[test]
    fn test_extract_bearer_prefix_case_insensitive() {
        for header in ["Bearer tok", "bearer tok", "BEARER   tok", "  BeArEr tok  "] {
            assert_eq!(extract_token(None, Some(header)), Some("tok".to_string()), "{}", header);
        }
    }

    #[test]
    fn test_extract_header_without_prefix() {
        assert_eq!(extract_token(None, Some("rawtoken")), Some("rawtoken".to_string()));
        // The prefix must be followed by whitespace
        assert_eq!(extract_token(None, Some("Bearertok")), Some("Bearertok".to_string()));
    }

    #[test]
    fn test_extract_missing_or_blank() {
        assert_eq!(extract_token(None, None), None);
        assert_eq!(extract_token(None, Some("Bearer   ")), None);
        assert_eq!(extract_token(None, Some("")), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let token = sign("user-1", "secret");
        let identity = JwtVerifier.verify(&token, "secret").unwrap();
        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.role.as_deref(), Some("pilot"));
    }

    #[test]
    fn test_jwt_wrong_secret() {
        let token = sign("user-1", "secret");
        assert!(matches!(JwtVerifier.verify(&token, "other"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_jwt_expired() {
        let claims = Claims {
            sub: "old".to_string(),
            email: None,
            role: None,
            exp: Some((chrono::Utc::now().timestamp() - 3600) as usize),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert!(matches!(JwtVerifier.verify(&token, "secret"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_jwt_without_expiry_is_accepted() {
        let claims = serde_json::json!({ "sub": "user-2", "email": "user-2@example.com", "role": "student" });
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();

        let identity = JwtVerifier.verify(&token, "secret").unwrap();
        assert_eq!(identity.subject, "user-2");
        assert_eq!(identity.role.as_deref(), Some("student"));
        assert!(matches!(JwtVerifier.verify(&token, "other"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_jwt_garbage() {
        assert!(JwtVerifier.verify("not.a.jwt", "secret").is_err());
    }

    #[test]
    fn test_authenticate_missing_token_skips_verifier() {
        let mut verifier = MockTokenVerifier::new();
        verifier.expect_verify().never();
        let result = authenticate(&verifier, Some("secret"), None, None);
        assert!(matches!(result, Err(AuthError::MissingToken)));
    }

    #[test]
    fn test_authenticate_missing_secret_skips_verifier() {
        let mut verifier = MockTokenVerifier::new();
        verifier.expect_verify().never();
        let result = authenticate(&verifier, None, Some("tok"), None);
        assert!(matches!(result, Err(AuthError::MissingSecret)));
        let result = authenticate(&verifier, Some(""), Some("tok"), None);
        assert!(matches!(result, Err(AuthError::MissingSecret)));
    }

    #[test]
    fn test_authenticate_passes_stripped_token() {
        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify()
            .with(eq("tok"), eq("secret"))
            .times(1)
            .returning(|_, _| {
                Ok(Identity {
                    subject: "u".to_string(),
                    email: None,
                    role: None,
                })
            });
        let identity = authenticate(&verifier, Some("secret"), None, Some("Bearer tok")).unwrap();
        assert_eq!(identity.subject, "u");
    }

    #[test]
    fn test_authenticate_propagates_verifier_failure() {
        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify()
            .returning(|_, _| Err(AuthError::InvalidToken("bad signature".to_string())));
        let result = authenticate(&verifier, Some("secret"), Some("tok"), None);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }
}
