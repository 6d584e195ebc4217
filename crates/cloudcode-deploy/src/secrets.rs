//! Password hashing and secret generation for the auth gateway

use crate::error::{DeployError, Result};
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

// Must match the argon2 settings in authelia/configuration.yml
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 8;
const ARGON2_SALT_LEN: usize = 16;
const ARGON2_KEY_LEN: usize = 32;

const SECRET_LEN: usize = 32;

/// Hash a password with Argon2id into a PHC string
/// (`$argon2id$v=19$m=65536,t=1,p=8$<salt>$<hash>`)
pub fn hash_password(password: &str) -> Result<String> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(ARGON2_KEY_LEN),
    )
    .map_err(|e| DeployError::Secret(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut salt_bytes = [0u8; ARGON2_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| DeployError::Secret(e.to_string()))?;

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DeployError::Secret(e.to_string()))?;
    Ok(hash.to_string())
}

/// 32 random bytes, standard base64
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
