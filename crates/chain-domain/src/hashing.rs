// hashing.rs
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
  Sha256::digest(data).into()
}

/// SHA-256 aplicado dos veces; es el hash de transacciones y firmas.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
  sha256(&sha256(data))
}

/// RIPEMD160(SHA256(data)): compromiso de datos y hash de claves/scripts.
pub fn hash160(data: &[u8]) -> [u8; 20] {
  Ripemd160::digest(sha256(data)).into()
}
