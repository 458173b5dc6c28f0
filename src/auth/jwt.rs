use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

#[derive(Serialize, Deserialize)]
struct RefreshClaims {
    #[serde(rename = "refreshTokenId")]
    refresh_token_id: Uuid,
    iat: u64,
    exp: u64,
}

#[derive(Serialize, Deserialize)]
struct AuthorizationClaims {
    #[serde(rename = "authorizationTokenId")]
    authorization_token_id: Uuid,
    iat: u64,
    exp: u64,
}

#[derive(Clone)]
pub struct TokenSettings {
    pub refresh_secret: String,
    pub authorization_secret: String,
    pub refresh_ttl: Duration,
    pub authorization_ttl: Duration,
}

struct SigningContext {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningContext {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// `(iat, exp)` for a token minted now.
    fn window(&self) -> (u64, u64) {
        let now = Utc::now();
        let iat = now.timestamp().max(0) as u64;
        let exp = (now + self.ttl).timestamp().max(0) as u64;
        (iat, exp)
    }
}

/// Mints and parses the two session tokens. Each token only references a
/// server-side row; the refresh and authorization contexts use separate
/// secrets and separate claim names, so neither verifies as the other.
pub struct TokenCodec {
    refresh: SigningContext,
    authorization: SigningContext,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(settings: &TokenSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            refresh: SigningContext::new(&settings.refresh_secret, settings.refresh_ttl),
            authorization: SigningContext::new(
                &settings.authorization_secret,
                settings.authorization_ttl,
            ),
            validation,
        }
    }

    pub fn mint_refresh_token(
        &self,
        refresh_token_id: Uuid,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let (iat, exp) = self.refresh.window();
        let claims = RefreshClaims {
            refresh_token_id,
            iat,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh.encoding)
    }

    pub fn mint_authorization_token(
        &self,
        authorization_token_id: Uuid,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let (iat, exp) = self.authorization.window();
        let claims = AuthorizationClaims {
            authorization_token_id,
            iat,
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.authorization.encoding,
        )
    }

    pub fn parse_refresh_token(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims: RefreshClaims = self.parse(token, &self.refresh)?;
        Ok(claims.refresh_token_id)
    }

    pub fn parse_authorization_token(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims: AuthorizationClaims = self.parse(token, &self.authorization)?;
        Ok(claims.authorization_token_id)
    }

    fn parse<C: DeserializeOwned>(
        &self,
        token: &str,
        context: &SigningContext,
    ) -> Result<C, TokenError> {
        decode::<C>(token.trim(), &context.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| classify(err.kind()))
    }
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        _ => TokenError::Malformed,
    }
}
