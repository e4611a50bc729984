//! Session tokens
//!
//! Compact JWS (`alg: EdDSA`) carrying the user id and email. The Ed25519
//! signing key is derived from the configured session secret, so tokens
//! survive restarts as long as the secret does.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::AuthError;

/// Seven days.
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

const ALG: &str = "EdDSA";

#[derive(Clone)]
pub struct TokenSigner {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl TokenSigner {
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, AuthError> {
        self.issue_at(user_id, email, Utc::now())
    }

    pub fn issue_at(&self, user_id: &str, email: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            id: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + SESSION_TTL_SECS,
        };

        let header = serde_json::to_vec(&header).map_err(|_| AuthError::Malformed)?;
        let claims = serde_json::to_vec(&claims).map_err(|_| AuthError::Malformed)?;
        let signing_input = format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(claims));
        let signature = self.signing.sign(signing_input.as_bytes());

        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature.to_bytes())))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header: Header = decode_json(header_b64)?;
        if header.alg != ALG {
            return Err(AuthError::Malformed);
        }

        let sig_bytes = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::Malformed)?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| AuthError::Malformed)?;
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        self.verifying
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_json(claims_b64)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(part: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD.decode(part).map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}
