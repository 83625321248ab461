//! State tokens and PKCE S256 challenges
//!
//! Every interactive authorization gets a fresh, unguessable `state` value
//! (the correlator the provider echoes back on redirect) and a PKCE verifier
//! whose S256 challenge travels with the authorization URL (RFC 7636).

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// The only challenge method produced here.
pub const CHALLENGE_METHOD: &str = "S256";

/// A verifier and its derived challenge
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// 32 random bytes, base64url without padding (43 characters)
    pub verifier: String,

    /// base64url(SHA-256(verifier)), without padding
    pub challenge: String,
}

/// Generates a fresh PKCE S256 pair
///
/// # Examples
///
/// ```
/// use toolgate::auth::pkce;
///
/// let pkce = pkce::generate();
/// assert_eq!(pkce.verifier.len(), 43);
/// assert!(pkce::verify(&pkce.verifier, &pkce.challenge));
/// ```
pub fn generate() -> PkceChallenge {
    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for(&verifier);
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Computes the S256 challenge for a verifier
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Checks that `challenge` was derived from `verifier`
pub fn verify(verifier: &str, challenge: &str) -> bool {
    challenge_for(verifier) == challenge
}

/// Generates an unguessable single-use state token
///
/// 16 random bytes encoded as base64url without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Shortened form of a state token for log lines
pub fn state_prefix(state: &str) -> &str {
    match state.char_indices().nth(8) {
        Some((idx, _)) => &state[..idx],
        None => state,
    }
}
