use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use helpdesk_types::Role;
use helpdesk_types::api::{Claims, TokenKind};

use crate::config::{ConfigError, TokenConfig};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("token expiry out of range")]
    ExpiryOverflow,
}

/// A freshly signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or_default()
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl: std::time::Duration, ttl_key: &'static str) -> Result<Self, ConfigError> {
        let ttl = Duration::from_std(ttl).map_err(|_| ConfigError::InvalidValue {
            key: ttl_key,
            value: format!("{}s", ttl.as_secs()),
        })?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }
}

/// Signs and verifies access and refresh tokens. Each kind has its own secret
/// and lifetime; a token only verifies against the kind it was issued as.
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            access: SigningKeys::new(&config.access_secret, config.access_ttl, "JWT_ACCESS_TTL_MIN")?,
            refresh: SigningKeys::new(&config.refresh_secret, config.refresh_ttl, "JWT_REFRESH_TTL_DAYS")?,
            validation,
        })
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        self.keys(kind).ttl
    }

    pub fn issue(&self, kind: TokenKind, user_id: i64, role: Role) -> Result<IssuedToken, TokenError> {
        self.issue_at(kind, user_id, role, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        kind: TokenKind,
        user_id: i64,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let keys = self.keys(kind);
        let expires = now
            .checked_add_signed(keys.ttl)
            .ok_or(TokenError::ExpiryOverflow)?;
        let claims = Claims {
            uid: user_id,
            role,
            typ: kind,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?;

        debug!(
            "Issued {} token for user {} ({}), expires at {}",
            kind.as_str(),
            user_id,
            role,
            claims.exp
        );

        Ok(IssuedToken { token, claims })
    }

    /// Check signature, kind and expiry. Expired means `exp <= now`.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let keys = self.keys(kind);

        let claims = decode::<Claims>(token, &keys.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?
            .claims;

        if claims.typ != kind || claims.exp <= claims.iat {
            return Err(TokenError::Invalid);
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
