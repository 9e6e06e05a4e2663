//! Opaque API keys: `base64(json{k, n, id})` on the wire, a salted PBKDF2
//! hash of the secret at rest.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::ApiKeyError;

const SECRET_LENGTH: usize = 32;
const HASH_ITERATIONS: u32 = 10_000;
const HASH_LENGTH: usize = 50;

/// Decoded form of the token a client presents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyToken {
    #[serde(rename = "k")]
    pub secret: String,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "id")]
    pub owner_id: i64,
}

#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub hashed_key: String,
    pub encoded_token: String,
}

pub struct ApiKeyCodec;

impl ApiKeyCodec {
    pub fn generate(owner_id: i64, name: &str) -> Result<GeneratedApiKey, ApiKeyError> {
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect();

        let hashed_key = hash_secret(&secret, owner_id)?;
        let token = ApiKeyToken {
            secret,
            name: name.to_string(),
            owner_id,
        };
        let json = serde_json::to_vec(&token)
            .map_err(|e| ApiKeyError::Hashing(format!("Failed to encode API key: {}", e)))?;

        Ok(GeneratedApiKey {
            hashed_key,
            encoded_token: STANDARD.encode(json),
        })
    }

    pub fn decode(encoded_token: &str) -> Result<ApiKeyToken, ApiKeyError> {
        let json = STANDARD
            .decode(encoded_token.trim())
            .map_err(|_| ApiKeyError::InvalidFormat)?;
        serde_json::from_slice(&json).map_err(|_| ApiKeyError::InvalidFormat)
    }

    /// Recomputes the hash from the presented secret and owner and compares
    /// it in constant time with the stored one.
    pub fn is_valid(token: &ApiKeyToken, stored_hash: &str) -> Result<bool, ApiKeyError> {
        let computed = hash_secret(&token.secret, token.owner_id)?;
        Ok(computed.as_bytes().ct_eq(stored_hash.as_bytes()).into())
    }
}

/// PBKDF2-HMAC-SHA256 of the secret, salted with the owner id, hex encoded.
fn hash_secret(secret: &str, owner_id: i64) -> Result<String, ApiKeyError> {
    let salt = owner_id.to_string();
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), HASH_ITERATIONS, &mut out);
    Ok(hex::encode(out))
}
