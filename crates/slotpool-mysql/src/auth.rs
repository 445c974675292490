//! MySQL authentication plugins.
//!
//! - `mysql_native_password`: `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
//! - `caching_sha2_password` fast path:
//!   `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))`
//! - `caching_sha2_password` / `sha256_password` full path without TLS:
//!   RSA-encrypt `(password + NUL) XOR seed` with the server's public key.
//! - `mysql_clear_password`: password + NUL.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Status bytes of the caching_sha2_password exchange.
pub mod caching_sha2 {
    /// Prefix of an AuthMoreData packet
    pub const MORE_DATA: u8 = 0x01;
    /// Client request for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Status bytes of the sha256_password exchange.
pub mod sha256 {
    /// Initial response asking the server for its RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x01;
}

/// Strip the trailing NUL MySQL appends to its 20-byte scramble.
pub fn scramble_seed(auth_data: &[u8]) -> &[u8] {
    match auth_data {
        [seed @ .., 0] if seed.len() == 20 => seed,
        _ => auth_data,
    }
}

/// Compute the first auth response for a plugin; unknown plugins fall back
/// to mysql_native_password.
///
/// For sha256_password without TLS the response only asks for the server's
/// public key (or is a single NUL for an empty password); the encrypted
/// password follows once the key arrives.
pub fn auth_response(plugin: &str, password: &str, auth_data: &[u8]) -> Vec<u8> {
    match plugin {
        plugins::CACHING_SHA2_PASSWORD => caching_sha2_password(password, auth_data),
        plugins::SHA256_PASSWORD if password.is_empty() => vec![0],
        plugins::SHA256_PASSWORD => vec![sha256::REQUEST_PUBLIC_KEY],
        plugins::MYSQL_CLEAR_PASSWORD => {
            let mut out = password.as_bytes().to_vec();
            out.push(0);
            out
        }
        _ => mysql_native_password(password, auth_data),
    }
}

/// mysql_native_password scramble. Empty password yields an empty response.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    let seed = &auth_data[..auth_data.len().min(20)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// caching_sha2_password fast-auth scramble. Empty password yields an empty response.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    let seed = scramble_seed(auth_data);

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Encrypt the password for full authentication over a plain connection.
///
/// `public_key_pem` is the PEM the server sends after a public key request,
/// either SPKI or PKCS#1 encoded. MySQL 8.0.5+ expects OAEP padding.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
    use_oaep: bool,
) -> Result<Vec<u8>, String> {
    let seed = scramble_seed(seed);
    if seed.is_empty() {
        return Err("Seed is empty".to_string());
    }

    let mut pw = password.as_bytes().to_vec();
    pw.push(0);
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| format!("Public key is not valid UTF-8 PEM: {e}"))?;
    let pub_key = RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| format!("Failed to parse RSA public key PEM: {e}"))?;

    if use_oaep {
        pub_key
            .encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
            .map_err(|e| format!("RSA OAEP encryption failed: {e}"))
    } else {
        pub_key
            .encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, &pw)
            .map_err(|e| format!("RSA PKCS1v1.5 encryption failed: {e}"))
    }
}
