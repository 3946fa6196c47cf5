//! Signing key management.
//!
//! [`KeyManager`] owns the P-256 signing key and is the only component that
//! touches private key material. [`TicketPublicKey`] is the verification half
//! and can be loaded on its own by a check-in process that never sees the
//! private key.
//!
//! Keys are stored as PEM files: PKCS#8 for the private key and SPKI for the
//! public key, the same files `openssl genpkey -algorithm EC` produces.

use crate::config::KeyPaths;
use crate::error::{Result, TicketError};
use crate::signature::CanonicalSignature;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{DerSignature, Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::{info, warn};

/// Holder of the ticket signing key.
///
/// Signatures are ECDSA over P-256 with a SHA-256 digest. The backend emits DER;
/// [`sign`](Self::sign) converts that to the canonical 64-byte form.
#[derive(Clone)]
pub struct KeyManager {
    signing_key: SigningKey,
    public_key: TicketPublicKey,
}

impl KeyManager {
    /// Wrap an existing signing key.
    #[must_use]
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = TicketPublicKey(signing_key.verifying_key().clone());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Load the private key from `paths.private_key_path`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::KeyMissing`] if the file does not exist
    /// - [`TicketError::KeyCorrupt`] if it cannot be read or is not a P-256 PKCS#8 key
    pub fn load(paths: &KeyPaths) -> Result<Self> {
        let path = &paths.private_key_path;
        let pem = read_key_file(path)?;
        let signing_key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| TicketError::KeyCorrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Signing key loaded");
        Ok(Self::from_signing_key(signing_key))
    }

    /// Generate a fresh keypair and write both PEM files.
    ///
    /// Never overwrites: if either file already exists nothing is written.
    ///
    /// # Errors
    ///
    /// - [`TicketError::KeyAlreadyExists`] if either target file exists
    /// - [`TicketError::KeyCorrupt`] if encoding or writing fails
    pub fn generate_keypair(paths: &KeyPaths) -> Result<Self> {
        for path in [&paths.private_key_path, &paths.public_key_path] {
            if path.exists() {
                return Err(TicketError::KeyAlreadyExists { path: path.clone() });
            }
        }

        let manager = Self::from_signing_key(SigningKey::random(&mut OsRng));

        let private_pem = manager
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| TicketError::KeyCorrupt {
                path: paths.private_key_path.clone(),
                reason: e.to_string(),
            })?;
        let public_pem = manager.public_key.to_pem()?;

        write_new_file(&paths.private_key_path, private_pem.as_bytes())?;
        if let Err(error) = write_new_file(&paths.public_key_path, public_pem.as_bytes()) {
            // Without its public half the private key only blocks the next attempt.
            if let Err(undo) = std::fs::remove_file(&paths.private_key_path) {
                warn!(
                    path = %paths.private_key_path.display(),
                    error = %undo,
                    "Failed to remove private key after public key write failed"
                );
            }
            return Err(error);
        }

        info!(
            private_key = %paths.private_key_path.display(),
            public_key = %paths.public_key_path.display(),
            "Generated new signing keypair"
        );
        Ok(manager)
    }

    /// Sign `message`, returning the canonical 64-byte form.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::MalformedSignature`] if the backend output cannot be
    /// converted, which would indicate a backend defect.
    pub fn sign(&self, message: &[u8]) -> Result<CanonicalSignature> {
        let der: DerSignature = self.signing_key.sign(message);
        Ok(CanonicalSignature::from_der(der.as_bytes())?)
    }

    /// Public half of the managed key.
    #[must_use]
    pub const fn public_key(&self) -> &TicketPublicKey {
        &self.public_key
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// P-256 verification key for ticket signatures.
#[derive(Clone, PartialEq, Eq)]
pub struct TicketPublicKey(VerifyingKey);

impl TicketPublicKey {
    /// Wrap a verifying key.
    #[must_use]
    pub const fn new(key: VerifyingKey) -> Self {
        Self(key)
    }

    /// Load from an SPKI PEM file.
    ///
    /// # Errors
    ///
    /// - [`TicketError::KeyMissing`] if the file does not exist
    /// - [`TicketError::KeyCorrupt`] if it is not a P-256 public key
    pub fn load(path: &Path) -> Result<Self> {
        let pem = read_key_file(path)?;
        Self::from_pem(&pem).map_err(|e| match e {
            TicketError::KeyCorrupt { reason, .. } => TicketError::KeyCorrupt {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse an SPKI PEM document. Keys on other curves are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::KeyCorrupt`] if parsing fails.
    pub fn from_pem(pem: &str) -> Result<Self> {
        VerifyingKey::from_public_key_pem(pem)
            .map(Self)
            .map_err(|e| TicketError::KeyCorrupt {
                path: "<inline>".into(),
                reason: e.to_string(),
            })
    }

    /// Encode as SPKI PEM.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::KeyCorrupt`] if encoding fails.
    pub fn to_pem(&self) -> Result<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TicketError::KeyCorrupt {
                path: "<inline>".into(),
                reason: e.to_string(),
            })
    }

    /// Check `signature` over `message`.
    ///
    /// Returns `false` for any mismatch, including scalars that are zero or out
    /// of range for the curve. Never panics on untrusted input.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &CanonicalSignature) -> bool {
        Signature::from_slice(signature.as_bytes())
            .is_ok_and(|signature| self.0.verify(message, &signature).is_ok())
    }

    /// Uncompressed SEC1 encoding, for display and fingerprints.
    #[must_use]
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl fmt::Debug for TicketPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sec1 = self.to_sec1_bytes();
        let prefix: String = sec1.iter().take(8).map(|b| format!("{b:02x}")).collect();
        write!(f, "TicketPublicKey({prefix}…)")
    }
}

/// Free-function form of [`TicketPublicKey::verify`].
#[must_use]
pub fn verify(message: &[u8], signature: &CanonicalSignature, public_key: &TicketPublicKey) -> bool {
    public_key.verify(message, signature)
}

fn read_key_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            TicketError::KeyMissing {
                path: path.to_path_buf(),
            }
        } else {
            TicketError::KeyCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })
}

fn write_new_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                TicketError::KeyAlreadyExists {
                    path: path.to_path_buf(),
                }
            } else {
                TicketError::KeyCorrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            // The file was created by this call; a partial key must not stay behind.
            let _ = std::fs::remove_file(path);
            TicketError::KeyCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })
}
