// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HS256 bearer tokens.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id
    pub sub: String,
    /// Primary role name
    pub role: String,
    /// Tenant the token is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Platform-wide operator flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_superadmin: Option<bool>,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiration (seconds since epoch)
    pub exp: i64,
}

impl TokenClaims {
    /// Whether the token grants superadmin.
    pub fn superadmin(&self) -> bool {
        self.is_superadmin.unwrap_or(false)
    }
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::NotAuthenticated("authorization header is missing".to_string()))?;
    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        Error::NotAuthenticated("authorization header must use the Bearer scheme".to_string())
    })?;
    let token = token.trim();
    if token.is_empty() || token == "null" || token == "undefined" {
        return Err(Error::NotAuthenticated("bearer token is empty".to_string()));
    }
    Ok(token)
}

/// Signs and verifies bearer tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenVerifier {
    /// Create a verifier from a shared secret.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Issue a token for `sub`.
    pub fn issue(
        &self,
        sub: &str,
        role: &str,
        tenant_id: Option<&str>,
        is_superadmin: bool,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: sub.to_string(),
            role: role.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            is_superadmin: is_superadmin.then_some(true),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| Error::Validation(format!("failed to sign token: {e}")))
    }

    /// Verify a raw token.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<TokenClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidToken => "invalid token",
                    _ => "token validation failed",
                };
                Error::NotAuthenticated(reason.to_string())
            })
    }

    /// Verify the token carried by an `Authorization` header value.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<TokenClaims> {
        self.verify(bearer_token(authorization)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(b"test-secret-with-enough-entropy-0123456789", Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_and_verify() {
        let v = verifier();
        let token = v.issue("u1", "student", Some("t1"), false).unwrap();
        let claims = v.authenticate(Some(&format!("Bearer {token}"))).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, "student");
        assert_eq!(claims.tenant_id.as_deref(), Some("t1"));
        assert!(!claims.superadmin());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_header_shapes_rejected() {
        for header in [None, Some(""), Some("Token abc"), Some("Bearer "), Some("Bearer null"), Some("Bearer undefined")] {
            let err = bearer_token(header).unwrap_err();
            assert_eq!(err.kind(), "NOT_AUTHENTICATED", "{header:?}");
        }
    }

    #[test]
    fn test_expired_token_rejected() {
        let v = verifier();
        let now = Utc::now().timestamp();
        let token = v
            .sign(&TokenClaims {
                sub: "u1".into(),
                role: "student".into(),
                tenant_id: None,
                is_superadmin: None,
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        let err = v.verify(&token).unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated(ref m) if m == "token expired"));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let token = TokenVerifier::new(b"another-secret-another-secret-another", Duration::from_secs(60))
            .issue("u1", "admin", None, true)
            .unwrap();
        assert!(verifier().verify(&token).is_err());
    }
}
