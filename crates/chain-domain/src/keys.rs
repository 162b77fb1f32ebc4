// keys.rs
use crate::hashing::{hash160, sha256};
use crate::DomainError;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longitud de una clave pública secp256k1 comprimida.
pub const COMPRESSED_KEY_LEN: usize = 33;

/// Clave pública comprimida (33 bytes, formato SEC1).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "crate::serde_hex")] Vec<u8>);

impl PublicKey {
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
    if bytes.len() != COMPRESSED_KEY_LEN {
      return Err(DomainError::ValidationError(format!("Clave pública de {} bytes, se esperaban {}",
                                                      bytes.len(),
                                                      COMPRESSED_KEY_LEN)));
    }
    VerifyingKey::from_sec1_bytes(bytes).map_err(|e| DomainError::ValidationError(format!("Clave pública inválida: {}", e)))?;
    Ok(Self(bytes.to_vec()))
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  pub fn pubkey_hash(&self) -> [u8; 20] {
    hash160(&self.0)
  }

  /// Verifica una firma DER sobre un digest ya calculado.
  pub fn verify_digest(&self, digest: &[u8; 32], der: &[u8]) -> Result<(), DomainError> {
    let key = VerifyingKey::from_sec1_bytes(&self.0).map_err(|e| DomainError::ValidationError(e.to_string()))?;
    let sig = Signature::from_der(der).map_err(|e| DomainError::SignatureMismatch(format!("DER inválido: {}", e)))?;
    key.verify_prehash(digest, &sig)
       .map_err(|_| DomainError::SignatureMismatch(format!("la firma no corresponde a la clave {}", self)))
  }
}

impl fmt::Display for PublicKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", hex::encode(&self.0))
  }
}

impl fmt::Debug for PublicKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "PublicKey({})", hex::encode(&self.0))
  }
}

/// Par de claves derivado de forma determinista a partir de una semilla.
#[derive(Clone)]
pub struct KeyPair {
  signing: SigningKey,
  public: PublicKey,
}

impl KeyPair {
  pub fn from_seed(seed: &[u8]) -> Result<Self, DomainError> {
    let secret = sha256(seed);
    let signing = SigningKey::from_slice(&secret).map_err(|e| DomainError::ValidationError(format!("Semilla inválida: {}", e)))?;
    let encoded = signing.verifying_key().to_encoded_point(true);
    let public = PublicKey::from_bytes(encoded.as_bytes())?;
    Ok(Self { signing, public })
  }

  pub fn public_key(&self) -> &PublicKey {
    &self.public
  }

  /// Firma determinista (RFC 6979) del digest; devuelve la firma en DER.
  pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, DomainError> {
    let sig: Signature = self.signing
                             .sign_prehash(digest)
                             .map_err(|e| DomainError::Internal(format!("fallo al firmar: {}", e)))?;
    Ok(sig.to_der().as_bytes().to_vec())
  }
}

impl fmt::Debug for KeyPair {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "KeyPair({})", self.public)
  }
}

/// Firma digests con claves que no salen de la billetera.
pub trait TransactionSigner {
  fn sign_digest(&self, key: &PublicKey, digest: &[u8; 32]) -> Result<Vec<u8>, DomainError>;
}

impl TransactionSigner for KeyPair {
  fn sign_digest(&self, key: &PublicKey, digest: &[u8; 32]) -> Result<Vec<u8>, DomainError> {
    if key != &self.public {
      return Err(DomainError::ValidationError(format!("Clave desconocida: {}", key)));
    }
    KeyPair::sign_digest(self, digest)
  }
}
