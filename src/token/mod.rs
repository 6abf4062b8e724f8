//! Stateless signing and verification of access and refresh tokens.
//!
//! Two independent HS256 secrets are used, one per token kind, so an access
//! token can never verify through the refresh path even if both are well
//! formed. Verification collapses every failure mode to `None`; the concrete
//! reason is only logged at debug level so callers cannot be turned into a
//! token oracle.

use anyhow::{ensure, Context, Result};
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Access tokens are always short-lived; permissions can change mid-session.
pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
/// Refresh tokens live as long as the session row that backs them.
pub const REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Link back to the administrator when a token was minted via impersonation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonatorRef {
    pub admin_user_id: Uuid,
    pub admin_session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Vec<String>,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonator: Option<ImpersonatorRef>,
}

impl AccessClaims {
    #[must_use]
    pub fn is_impersonated(&self) -> bool {
        self.impersonator.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    /// High-entropy opaque value. The session row persists a one-way hash of
    /// this, never of the signed token itself.
    pub jti: String,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed refresh token plus its opaque value, handed to the
/// session layer exactly once so the hash can be stored.
#[derive(Debug)]
pub struct IssuedRefresh {
    pub token: String,
    pub opaque: String,
}

/// Everything the caller must resolve before an access token can be minted.
#[derive(Debug, Clone)]
pub struct AccessTokenParams {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub tenant_id: Option<Uuid>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Vec<String>,
    pub impersonator: Option<ImpersonatorRef>,
}

pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    /// Build a signer/verifier pair from the two secret materials.
    ///
    /// # Errors
    /// Returns an error when either secret is empty: a service that cannot
    /// verify tokens must not start accepting traffic.
    pub fn new(access_secret: &SecretString, refresh_secret: &SecretString) -> Result<Self> {
        let access = access_secret.expose_secret().trim();
        let refresh = refresh_secret.expose_secret().trim();
        ensure!(!access.is_empty(), "access token secret is empty");
        ensure!(!refresh.is_empty(), "refresh token secret is empty");
        ensure!(
            access != refresh,
            "access and refresh token secrets must differ"
        );

        let mut validation = Validation::default();
        validation.leeway = 0;

        Ok(Self {
            access_encoding: EncodingKey::from_secret(access.as_bytes()),
            access_decoding: DecodingKey::from_secret(access.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh.as_bytes()),
            validation,
        })
    }

    /// Sign an access token with the standard 15 minute lifetime.
    ///
    /// # Errors
    /// Returns an error only when serialization or signing itself fails.
    pub fn issue_access(&self, params: AccessTokenParams) -> Result<String> {
        self.issue_access_with_ttl(params, ACCESS_TOKEN_TTL_SECONDS)
    }

    /// Sign an access token with a caller-chosen lifetime.
    ///
    /// Only the impersonation subsystem uses this; ordinary logins always go
    /// through [`TokenService::issue_access`].
    ///
    /// # Errors
    /// Returns an error only when serialization or signing itself fails.
    pub fn issue_access_with_ttl(
        &self,
        params: AccessTokenParams,
        ttl_seconds: i64,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: params.user_id,
            sid: params.session_id,
            email: params.email,
            tenant_id: params.tenant_id,
            role: params.role,
            role_level: params.role_level,
            permissions: params.permissions,
            token_type: TokenKind::Access,
            iat: now,
            exp: now + ttl_seconds,
            impersonator: params.impersonator,
        };
        Ok(encode(&Header::default(), &claims, &self.access_encoding)?)
    }

    /// Sign a refresh token bound to one session. Each issuance embeds fresh
    /// OS randomness, so two refresh tokens are never byte-identical and the
    /// previous one becomes dead the moment the session row adopts the new
    /// opaque hash.
    ///
    /// # Errors
    /// Returns an error when signing fails or the OS random source is
    /// unavailable.
    pub fn issue_refresh(&self, user_id: Uuid, session_id: Uuid) -> Result<IssuedRefresh> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate refresh token entropy")?;
        let opaque = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            sub: user_id,
            sid: session_id,
            jti: opaque.clone(),
            token_type: TokenKind::Refresh,
            iat: now,
            exp: now + REFRESH_TOKEN_TTL_SECONDS,
        };
        let token = encode(&Header::default(), &claims, &self.refresh_encoding)?;
        Ok(IssuedRefresh { token, opaque })
    }

    /// Verify an access token. Any failure yields `None`.
    #[must_use]
    pub fn verify_access(&self, token: &str) -> Option<AccessClaims> {
        let claims = match decode::<AccessClaims>(token, &self.access_decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(err) => {
                debug!("access token rejected: {err}");
                return None;
            }
        };
        if claims.token_type != TokenKind::Access {
            debug!("access token rejected: wrong token type");
            return None;
        }
        Some(claims)
    }

    /// Verify a refresh token. Any failure yields `None`.
    #[must_use]
    pub fn verify_refresh(&self, token: &str) -> Option<RefreshClaims> {
        let claims = match decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)
        {
            Ok(data) => data.claims,
            Err(err) => {
                debug!("refresh token rejected: {err}");
                return None;
            }
        };
        if claims.token_type != TokenKind::Refresh {
            debug!("refresh token rejected: wrong token type");
            return None;
        }
        Some(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn service() -> Result<TokenService> {
        TokenService::new(
            &SecretString::from("access-secret-material"),
            &SecretString::from("refresh-secret-material"),
        )
    }

    fn params() -> AccessTokenParams {
        AccessTokenParams {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            tenant_id: Some(Uuid::new_v4()),
            role: "mentor".to_string(),
            role_level: 30,
            permissions: vec!["dashboard".to_string(), "mentoring".to_string()],
            impersonator: None,
        }
    }

    #[test]
    fn rejects_empty_secrets() {
        let empty = SecretString::from("");
        let filled = SecretString::from("secret");
        assert!(TokenService::new(&empty, &filled).is_err());
        assert!(TokenService::new(&filled, &empty).is_err());
        assert!(TokenService::new(&SecretString::from("  "), &filled).is_err());
    }

    #[test]
    fn rejects_shared_secret() {
        let secret = SecretString::from("same-material");
        assert!(TokenService::new(&secret, &secret).is_err());
    }

    #[test]
    fn access_round_trip_preserves_claims() -> Result<()> {
        let service = service()?;
        let input = params();
        let token = service.issue_access(input.clone())?;
        let claims = service.verify_access(&token).context("expected claims")?;

        assert_eq!(claims.sub, input.user_id);
        assert_eq!(claims.sid, input.session_id);
        assert_eq!(claims.email, input.email);
        assert_eq!(claims.tenant_id, input.tenant_id);
        assert_eq!(claims.role, input.role);
        assert_eq!(claims.role_level, input.role_level);
        assert_eq!(claims.permissions, input.permissions);
        assert_eq!(claims.token_type, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_SECONDS);
        assert!(claims.impersonator.is_none());
        Ok(())
    }

    #[test]
    fn refresh_round_trip_preserves_claims() -> Result<()> {
        let service = service()?;
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let issued = service.issue_refresh(user_id, session_id)?;
        let claims = service
            .verify_refresh(&issued.token)
            .context("expected claims")?;

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, session_id);
        assert_eq!(claims.jti, issued.opaque);
        assert_eq!(claims.token_type, TokenKind::Refresh);
        assert_eq!(claims.exp - claims.iat, REFRESH_TOKEN_TTL_SECONDS);
        Ok(())
    }

    #[test]
    fn refresh_issuances_are_never_identical() -> Result<()> {
        let service = service()?;
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let first = service.issue_refresh(user_id, session_id)?;
        let second = service.issue_refresh(user_id, session_id)?;
        assert_ne!(first.token, second.token);
        assert_ne!(first.opaque, second.opaque);
        Ok(())
    }

    #[test]
    fn impersonation_reference_survives_round_trip() -> Result<()> {
        let service = service()?;
        let mut input = params();
        let admin = ImpersonatorRef {
            admin_user_id: Uuid::new_v4(),
            admin_session_id: Uuid::new_v4(),
        };
        input.impersonator = Some(admin.clone());
        let token = service.issue_access_with_ttl(input, 3600)?;
        let claims = service.verify_access(&token).context("expected claims")?;

        assert!(claims.is_impersonated());
        assert_eq!(claims.impersonator, Some(admin));
        assert_eq!(claims.exp - claims.iat, 3600);
        Ok(())
    }

    #[test]
    fn tampered_signature_yields_none() -> Result<()> {
        let service = service()?;
        let token = service.issue_access(params())?;

        // Flip one character in the signature segment; every variant must be
        // rejected without panicking.
        let last = token.chars().count() - 1;
        for (index, ch) in token.char_indices() {
            if index < last {
                continue;
            }
            let flipped = if ch == 'A' { 'B' } else { 'A' };
            let mut tampered = token.clone();
            tampered.replace_range(index..index + ch.len_utf8(), &flipped.to_string());
            assert!(service.verify_access(&tampered).is_none());
        }
        Ok(())
    }

    #[test]
    fn malformed_tokens_yield_none() -> Result<()> {
        let service = service()?;
        assert!(service.verify_access("").is_none());
        assert!(service.verify_access("not-a-token").is_none());
        assert!(service.verify_refresh("a.b").is_none());
        Ok(())
    }

    #[test]
    fn foreign_secret_yields_none() -> Result<()> {
        let signer = service()?;
        let other = TokenService::new(
            &SecretString::from("different-access-material"),
            &SecretString::from("different-refresh-material"),
        )?;
        let access = signer.issue_access(params())?;
        let refresh = signer.issue_refresh(Uuid::new_v4(), Uuid::new_v4())?;

        assert!(other.verify_access(&access).is_none());
        assert!(other.verify_refresh(&refresh.token).is_none());
        Ok(())
    }

    #[test]
    fn token_kinds_never_cross_verify() -> Result<()> {
        let service = service()?;
        let access = service.issue_access(params())?;
        let refresh = service.issue_refresh(Uuid::new_v4(), Uuid::new_v4())?;

        assert!(service.verify_refresh(&access).is_none());
        assert!(service.verify_access(&refresh.token).is_none());
        Ok(())
    }
}
