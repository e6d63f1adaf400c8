//! Session cookie issuance and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::account::User;
use crate::claims::{validate_claims, SessionClaims, SessionError};

pub const COOKIE_NAME: &str = "app_session_id";

pub const DEFAULT_SESSION_TTL_DAYS: i64 = 365;

/// Signs and verifies session tokens.
pub trait SessionCodec: Send + Sync {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<String, SessionError>;

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError>;

    /// Lifetime of issued sessions (used for the cookie `Max-Age`).
    fn ttl(&self) -> Duration;
}

/// HS256 JWT codec over a shared secret.
pub struct Hs256SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl Hs256SessionCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }
}

impl SessionCodec for Hs256SessionCodec {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = SessionClaims {
            user_id: user.id,
            open_id: user.open_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::Encode(e.to_string()))
    }

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // The claim window is checked against the caller's clock below.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|e| SessionError::Decode(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Value of cookie `name` in a `Cookie` request header.
pub fn read_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k.trim() == name).then(|| v.trim().trim_matches('"'))
    })
}

/// `Set-Cookie` value carrying a fresh session.
pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.num_seconds()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that makes the browser drop the session.
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::zero(), secure)
}
