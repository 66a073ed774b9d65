//! Compact HS256 JSON Web Tokens.
//!
//! Access and refresh tokens share one codec and differ only in their `typ`
//! claim and lifetime. A token presented as the wrong kind is rejected.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::ServerConfig;
use crate::domain::{Role, new_id};
use crate::error::{AuthFailure, RestError, RestResult};

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Token kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived bearer credential.
    Access,
    /// Longer-lived credential exchanged for a new pair.
    Refresh,
}

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Role at issue time.
    pub role: Role,
    /// Token kind.
    pub typ: TokenKind,
    /// Unique token ID.
    pub jti: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expires at (unix seconds).
    pub exp: i64,
}

/// An access/refresh pair returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Bearer credential.
    pub access_token: String,
    /// Refresh credential.
    pub refresh_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Issues and verifies tokens.
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Creates a token service.
    pub fn new(secret: impl Into<Vec<u8>>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Creates a token service from the server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes().to_vec(),
            Duration::seconds(config.access_token_ttl as i64),
            Duration::seconds(config.refresh_token_ttl as i64),
        )
    }

    fn mac(&self) -> RestResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| RestError::internal(format!("Invalid token secret: {}", e)))
    }

    /// Issues one token.
    pub fn issue(
        &self,
        user_id: &str,
        role: Role,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> RestResult<(String, Claims)> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            typ: kind,
            jti: new_id(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        let payload = serde_json::to_vec(&claims)
            .map_err(|e| RestError::internal(format!("Failed to encode claims: {}", e)))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok((format!("{}.{}", signing_input, signature), claims))
    }

    /// Issues an access/refresh pair. Returns the pair and the refresh
    /// token's `jti`, which the caller records on the user.
    pub fn issue_pair(
        &self,
        user_id: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> RestResult<(TokenPair, String)> {
        let (access_token, _) = self.issue(user_id, role, TokenKind::Access, now)?;
        let (refresh_token, refresh) = self.issue(user_id, role, TokenKind::Refresh, now)?;
        Ok((
            TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.access_ttl.num_seconds(),
            },
            refresh.jti,
        ))
    }

    /// Verifies a token's signature, kind and expiry at `now`.
    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthFailure> {
        let (signing_input, signature) = token
            .rsplit_once('.')
            .ok_or(AuthFailure::InvalidCredential)?;
        let (header, payload) = signing_input
            .split_once('.')
            .filter(|(_, payload)| !payload.contains('.'))
            .ok_or(AuthFailure::InvalidCredential)?;

        let header = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| AuthFailure::InvalidCredential)?;
        let header: serde_json::Value =
            serde_json::from_slice(&header).map_err(|_| AuthFailure::InvalidCredential)?;
        if header.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
            return Err(AuthFailure::InvalidCredential);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthFailure::InvalidCredential)?;
        let mut mac = self.mac().map_err(|_| AuthFailure::InvalidCredential)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthFailure::InvalidCredential)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthFailure::InvalidCredential)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| AuthFailure::InvalidCredential)?;

        if claims.typ != expected {
            return Err(AuthFailure::InvalidCredential);
        }
        if now.timestamp() >= claims.exp {
            return Err(AuthFailure::ExpiredCredential);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            b"0123456789abcdef0123456789abcdef".to_vec(),
            Duration::seconds(60),
            Duration::seconds(3600),
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let svc = service();
        let now = Utc::now();
        let (token, issued) = svc.issue("u-1", Role::Doctor, TokenKind::Access, now).unwrap();
        let claims = svc.verify(&token, TokenKind::Access, now).unwrap();
        assert_eq!(claims, issued);
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.role, Role::Doctor);
    }

    #[test]
    fn test_expired_token() {
        let svc = service();
        let now = Utc::now();
        let (token, _) = svc.issue("u-1", Role::Nurse, TokenKind::Access, now).unwrap();
        let later = now + Duration::seconds(61);
        assert_eq!(
            svc.verify(&token, TokenKind::Access, later),
            Err(AuthFailure::ExpiredCredential)
        );
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let svc = service();
        let now = Utc::now();
        let (pair, _) = svc.issue_pair("u-1", Role::Patient, now).unwrap();
        assert_eq!(
            svc.verify(&pair.access_token, TokenKind::Refresh, now),
            Err(AuthFailure::InvalidCredential)
        );
        assert_eq!(
            svc.verify(&pair.refresh_token, TokenKind::Access, now),
            Err(AuthFailure::InvalidCredential)
        );
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 60);
    }

    #[test]
    fn test_forged_signature_rejected() {
        let svc = service();
        let other = TokenService::new(
            b"another-secret-another-secret-xx".to_vec(),
            Duration::seconds(60),
            Duration::seconds(3600),
        );
        let now = Utc::now();
        let (token, _) = other
            .issue("u-1", Role::SuperAdmin, TokenKind::Access, now)
            .unwrap();
        assert_eq!(
            svc.verify(&token, TokenKind::Access, now),
            Err(AuthFailure::InvalidCredential)
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let svc = service();
        let now = Utc::now();
        let (token, _) = svc.issue("u-1", Role::Patient, TokenKind::Access, now).unwrap();
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let forged = Claims {
            sub: "u-1".to_string(),
            role: Role::SuperAdmin,
            typ: TokenKind::Access,
            jti: "x".to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + 60,
        };
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        assert_eq!(
            svc.verify(&parts.join("."), TokenKind::Access, now),
            Err(AuthFailure::InvalidCredential)
        );
    }

    #[test]
    fn test_garbage_rejected() {
        let svc = service();
        for token in ["", "abc", "a.b", "a.b.c.d", "...."] {
            assert_eq!(
                svc.verify(token, TokenKind::Access, Utc::now()),
                Err(AuthFailure::InvalidCredential)
            );
        }
    }
}
