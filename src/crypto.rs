//! Cryptographic utilities for room ownership
//!
//! A room is the hex SHA-224 of an RSA public key in PKCS#1 PEM form. Writing
//! into a room requires proof of possession of the matching private key: the
//! registering node signs SHA-512(room) with RSA PKCS#1 v1.5 and sends the
//! signature together with its public key.
//!
//! Node identifiers are assigned by the beacon from the observed source IP,
//! never chosen by the client.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha224, Sha512, Sha512_224};
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

/// Default modulus size for generated room keys
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Prefix hashed together with the observed IP to form a node id
const NODE_ID_DOMAIN: &str = "node:";

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Derive the room name owned by a PEM-encoded public key
///
/// The digest is taken over the exact PEM bytes, so clients must send the same
/// encoding they hashed.
pub fn derive_room_name(public_key_pem: &[u8]) -> String {
    hex::encode(Sha224::digest(public_key_pem))
}

/// Derive the node id for an observed client address
pub fn node_id(observed_ip: IpAddr) -> String {
    let ip = observed_ip.to_canonical();
    let mut hasher = Sha512_224::new();
    hasher.update(NODE_ID_DOMAIN.as_bytes());
    hasher.update(ip.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// VERIFICATION
// =============================================================================

/// A public key supplied with a registration, kept with its PEM bytes
#[derive(Debug, Clone)]
pub struct RoomPublicKey {
    pem: Vec<u8>,
    key: RsaPublicKey,
}

impl RoomPublicKey {
    /// Decode a base64 PKCS#1 PEM public key
    pub fn from_base64_pem(public_key_b64: &str) -> Result<Self, AuthError> {
        let pem = STANDARD
            .decode(public_key_b64.trim())
            .map_err(|e| AuthError::PublicKeyEncoding(e.to_string()))?;

        let pem_str = std::str::from_utf8(&pem).map_err(|_| AuthError::PemBlock)?;
        let key = RsaPublicKey::from_pkcs1_pem(pem_str)
            .map_err(|e| AuthError::InvalidPublicKey(e.to_string()))?;

        Ok(Self { pem, key })
    }

    /// Room owned by this key
    pub fn room_name(&self) -> String {
        derive_room_name(&self.pem)
    }

    /// Verify a base64 signature over `room`
    pub fn verify_room(&self, room: &str, signature_b64: &str) -> Result<(), AuthError> {
        let signature = STANDARD
            .decode(signature_b64.trim())
            .map_err(|e| AuthError::SignatureEncoding(e.to_string()))?;

        let hashed = Sha512::digest(room.as_bytes());
        self.key
            .verify(Pkcs1v15Sign::new::<Sha512>(), &hashed, &signature)
            .map_err(|_| AuthError::InvalidSignature)
    }

    /// Require that `room` is the room derived from this key
    pub fn ensure_owns(&self, room: &str) -> Result<(), AuthError> {
        let derived = self.room_name();
        if derived != room {
            return Err(AuthError::RoomKeyMismatch {
                claimed: room.to_string(),
                derived,
            });
        }
        Ok(())
    }
}

/// Verify that `room` was signed by the private half of `public_key_b64`
///
/// This only checks the signature and hands back the decoded key. Whether the
/// room must also be derived from the key is decided by the caller.
pub fn verify_room_signature(
    room: &str,
    signature_b64: &str,
    public_key_b64: &str,
) -> Result<RoomPublicKey, AuthError> {
    // Signature is decoded first so a garbage signature is reported as such
    // even when the key is garbage too.
    STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| AuthError::SignatureEncoding(e.to_string()))?;

    let key = RoomPublicKey::from_base64_pem(public_key_b64)?;
    key.verify_room(room, signature_b64)?;
    Ok(key)
}

// =============================================================================
// ROOM KEYS (client side)
// =============================================================================

/// RSA key pair owning a room
///
/// Used by `--generate-room-key` and by tests to produce registrations the
/// same way nodes do.
pub struct RoomKey {
    private_key: RsaPrivateKey,
}

impl RoomKey {
    /// Generate a new room key
    pub fn generate(bits: usize) -> Result<Self, AuthError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| AuthError::KeyGeneration(e.to_string()))?;
        Ok(Self { private_key })
    }

    /// Load from a PKCS#1 PEM private key
    pub fn from_private_pem(pem: &str) -> Result<Self, AuthError> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| AuthError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { private_key })
    }

    /// PKCS#1 PEM of the private key
    pub fn private_key_pem(&self) -> Result<String, AuthError> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| AuthError::InvalidPrivateKey(e.to_string()))
    }

    /// PKCS#1 PEM of the public key
    pub fn public_key_pem(&self) -> Result<String, AuthError> {
        self.private_key
            .to_public_key()
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| AuthError::InvalidPublicKey(e.to_string()))
    }

    /// Base64 of the public key PEM, as sent in `publicKey`
    pub fn public_key_base64(&self) -> Result<String, AuthError> {
        Ok(STANDARD.encode(self.public_key_pem()?))
    }

    /// Room owned by this key
    pub fn room_name(&self) -> Result<String, AuthError> {
        Ok(derive_room_name(self.public_key_pem()?.as_bytes()))
    }

    /// Base64 signature over an arbitrary room string
    pub fn sign_room(&self, room: &str) -> Result<String, AuthError> {
        let hashed = Sha512::digest(room.as_bytes());
        let signature = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha512>(), &hashed)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(STANDARD.encode(signature))
    }

    /// Base64 signature over this key's own room, as sent in `roomSignature`
    pub fn room_signature(&self) -> Result<String, AuthError> {
        self.sign_room(&self.room_name()?)
    }
}

/// Save a room key as PEM (owner-only permissions on Unix)
pub async fn save_room_key(key: &RoomKey, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(path, key.private_key_pem()?).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    info!("🔑 Room key saved to {:?}", path);
    Ok(())
}

/// Load a room key from a PEM file
pub async fn load_room_key(path: &Path) -> anyhow::Result<RoomKey> {
    let pem = tokio::fs::read_to_string(path).await?;
    Ok(RoomKey::from_private_pem(&pem)?)
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("failed to decode signature: {0}")]
    SignatureEncoding(String),

    #[error("failed to decode public key: {0}")]
    PublicKeyEncoding(String),

    #[error("failed to decode pem block")]
    PemBlock,

    #[error("failed to parse public key: {0}")]
    InvalidPublicKey(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("room {claimed} is not owned by the supplied key (key owns {derived})")]
    RoomKeyMismatch { claimed: String, derived: String },

    #[error("failed to parse private key: {0}")]
    InvalidPrivateKey(String),

    #[error("failed to generate key: {0}")]
    KeyGeneration(String),

    #[error("failed to sign room: {0}")]
    Signing(String),
}

impl AuthError {
    /// True when the request could not even be decoded, as opposed to a
    /// well-formed proof that does not hold
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            AuthError::SignatureEncoding(_)
                | AuthError::PublicKeyEncoding(_)
                | AuthError::PemBlock
                | AuthError::InvalidPublicKey(_)
        )
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use super::RoomKey;
    use std::sync::OnceLock;

    // 1024 bits keeps debug-mode key generation fast and still fits a
    // PKCS#1 v1.5 SHA-512 signature.
    const TEST_KEY_BITS: usize = 1024;

    pub fn room_key() -> &'static RoomKey {
        static KEY: OnceLock<RoomKey> = OnceLock::new();
        KEY.get_or_init(|| RoomKey::generate(TEST_KEY_BITS).unwrap())
    }

    pub fn other_room_key() -> &'static RoomKey {
        static KEY: OnceLock<RoomKey> = OnceLock::new();
        KEY.get_or_init(|| RoomKey::generate(TEST_KEY_BITS).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{other_room_key, room_key};
    use super::*;

    #[test]
    fn test_room_name_is_sha224_hex() {
        let room = room_key().room_name().unwrap();
        assert!(crate::types::is_sha224_hex(&room));
        assert_eq!(room, derive_room_name(room_key().public_key_pem().unwrap().as_bytes()));
    }

    #[test]
    fn test_node_id_deterministic() {
        let a = node_id("1.2.3.4".parse().unwrap());
        let b = node_id("1.2.3.4".parse().unwrap());
        let c = node_id("1.2.3.5".parse().unwrap());

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(crate::types::is_sha224_hex(&a));
    }

    #[test]
    fn test_node_id_unmaps_ipv4() {
        let v4 = node_id("10.0.0.1".parse().unwrap());
        let mapped = node_id("::ffff:10.0.0.1".parse().unwrap());
        assert_eq!(v4, mapped);
    }

    #[test]
    fn test_node_id_matches_manual_digest() {
        let expected = hex::encode(Sha512_224::digest(b"node:192.168.0.7"));
        assert_eq!(node_id("192.168.0.7".parse().unwrap()), expected);
    }

    #[test]
    fn test_signature_roundtrip() {
        let key = room_key();
        let room = key.room_name().unwrap();
        let signature = key.room_signature().unwrap();
        let public_key = key.public_key_base64().unwrap();

        assert!(verify_room_signature(&room, &signature, &public_key).is_ok());
    }

    #[test]
    fn test_signature_for_other_room_fails() {
        let key = room_key();
        let r1 = key.room_name().unwrap();
        let r2 = other_room_key().room_name().unwrap();
        let signature = key.sign_room(&r1).unwrap();
        let public_key = key.public_key_base64().unwrap();

        assert_eq!(
            verify_room_signature(&r2, &signature, &public_key).unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[test]
    fn test_signature_from_other_key_fails() {
        let room = room_key().room_name().unwrap();
        let forged = other_room_key().sign_room(&room).unwrap();
        let public_key = room_key().public_key_base64().unwrap();

        assert_eq!(
            verify_room_signature(&room, &forged, &public_key).unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[test]
    fn test_decode_failures() {
        let public_key = room_key().public_key_base64().unwrap();
        let room = room_key().room_name().unwrap();

        let err = verify_room_signature(&room, "%%%", &public_key).unwrap_err();
        assert!(matches!(err, AuthError::SignatureEncoding(_)));
        assert!(err.is_decode_failure());

        let err = verify_room_signature(&room, "c2lnbmF0dXJl", "%%%").unwrap_err();
        assert!(matches!(err, AuthError::PublicKeyEncoding(_)));

        let not_pem = STANDARD.encode("hello");
        let err = verify_room_signature(&room, "c2lnbmF0dXJl", &not_pem).unwrap_err();
        assert!(matches!(err, AuthError::InvalidPublicKey(_)));
        assert!(err.is_decode_failure());

        assert!(!AuthError::InvalidSignature.is_decode_failure());
    }

    #[test]
    fn test_ensure_owns() {
        let key = RoomPublicKey::from_base64_pem(&room_key().public_key_base64().unwrap()).unwrap();
        let own = room_key().room_name().unwrap();
        let foreign = other_room_key().room_name().unwrap();

        assert!(key.ensure_owns(&own).is_ok());
        assert!(matches!(
            key.ensure_owns(&foreign),
            Err(AuthError::RoomKeyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_room_key_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let key_path = temp_dir.path().join("room.pem");

        save_room_key(room_key(), &key_path).await.unwrap();
        let loaded = load_room_key(&key_path).await.unwrap();

        assert_eq!(loaded.room_name().unwrap(), room_key().room_name().unwrap());
    }
}
