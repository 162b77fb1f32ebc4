// script.rs
// Construcción y análisis de los scripts que usa el protocolo: redeem
// scripts de compromiso + bloqueo por clave, envoltorio P2SH, salidas de
// datos (OP_RETURN) y scripts de desbloqueo.
use crate::hashing::hash160;
use crate::keys::PublicKey;
use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Tipo de hash de firma usado en todas las firmas on-chain.
pub const SIGHASH_ALL: u8 = 0x01;

/// Límite de bytes de una salida de datos.
pub const MAX_DATA_CARRIER_LEN: usize = 80;

/// Elemento de un script: un opcode o un push de datos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptChunk {
  Op(u8),
  Push(Vec<u8>),
}

impl ScriptChunk {
  pub fn data(&self) -> Option<&[u8]> {
    match self {
      ScriptChunk::Push(d) => Some(d),
      ScriptChunk::Op(_) => None,
    }
  }
}

#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Script(#[serde(with = "crate::serde_hex")] Vec<u8>);

impl Script {
  pub fn new(bytes: Vec<u8>) -> Self {
    Self(bytes)
  }

  pub fn from_chunks(chunks: &[ScriptChunk]) -> Self {
    let mut buf = Vec::new();
    for c in chunks {
      match c {
        ScriptChunk::Op(op) => buf.push(*op),
        ScriptChunk::Push(d) => push_data(&mut buf, d),
      }
    }
    Self(buf)
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Descompone el script en opcodes y pushes.
  pub fn chunks(&self) -> Result<Vec<ScriptChunk>, DomainError> {
    let b = &self.0;
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < b.len() {
      let op = b[i];
      i += 1;
      let len = match op {
        OP_0 => {
          out.push(ScriptChunk::Push(Vec::new()));
          continue;
        }
        0x01..=0x4b => op as usize,
        OP_PUSHDATA1 => {
          let n = *b.get(i).ok_or_else(|| truncated())? as usize;
          i += 1;
          n
        }
        OP_PUSHDATA2 => {
          let n = b.get(i..i + 2).ok_or_else(|| truncated())?;
          i += 2;
          u16::from_le_bytes([n[0], n[1]]) as usize
        }
        OP_PUSHDATA4 => {
          let n = b.get(i..i + 4).ok_or_else(|| truncated())?;
          i += 4;
          u32::from_le_bytes([n[0], n[1], n[2], n[3]]) as usize
        }
        _ => {
          out.push(ScriptChunk::Op(op));
          continue;
        }
      };
      let data = b.get(i..i + len).ok_or_else(|| truncated())?;
      out.push(ScriptChunk::Push(data.to_vec()));
      i += len;
    }
    Ok(out)
  }

  pub fn is_p2sh(&self) -> bool {
    let b = &self.0;
    b.len() == 23 && b[0] == OP_HASH160 && b[1] == 0x14 && b[22] == OP_EQUAL
  }

  pub fn is_p2pkh(&self) -> bool {
    let b = &self.0;
    b.len() == 25 && b[0] == OP_DUP && b[1] == OP_HASH160 && b[2] == 0x14 && b[23] == OP_EQUALVERIFY && b[24] == OP_CHECKSIG
  }

  pub fn is_data_carrier(&self) -> bool {
    self.0.first() == Some(&OP_RETURN)
  }

  /// Datos de una salida `OP_RETURN <datos>` con exactamente dos chunks.
  pub fn data_carrier_payload(&self) -> Option<Vec<u8>> {
    if !self.is_data_carrier() {
      return None;
    }
    match self.chunks().ok()?.as_slice() {
      [ScriptChunk::Op(OP_RETURN), ScriptChunk::Push(d)] => Some(d.clone()),
      _ => None,
    }
  }

  /// Dirección a la que paga este script de salida, si es estándar.
  pub fn address(&self) -> Option<Address> {
    let mut h = [0u8; 20];
    if self.is_p2sh() {
      h.copy_from_slice(&self.0[2..22]);
      Some(Address::ScriptHash(h))
    } else if self.is_p2pkh() {
      h.copy_from_slice(&self.0[3..23]);
      Some(Address::PubKeyHash(h))
    } else {
      None
    }
  }
}

impl fmt::Debug for Script {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Script({})", hex::encode(&self.0))
  }
}

fn truncated() -> DomainError {
  DomainError::SerializationError("script truncado".to_string())
}

fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
  let n = data.len();
  if n == 0 {
    buf.push(OP_0);
    return;
  }
  if n < OP_PUSHDATA1 as usize {
    buf.push(n as u8);
  } else if n <= 0xff {
    buf.push(OP_PUSHDATA1);
    buf.push(n as u8);
  } else if n <= 0xffff {
    buf.push(OP_PUSHDATA2);
    buf.extend_from_slice(&(n as u16).to_le_bytes());
  } else {
    buf.push(OP_PUSHDATA4);
    buf.extend_from_slice(&(n as u32).to_le_bytes());
  }
  buf.extend_from_slice(data);
}

/// Dirección estándar: hash de clave pública o hash de script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
  PubKeyHash([u8; 20]),
  ScriptHash([u8; 20]),
}

impl Address {
  pub fn is_p2sh(&self) -> bool {
    matches!(self, Address::ScriptHash(_))
  }

  pub fn script_pubkey(&self) -> Script {
    match self {
      Address::PubKeyHash(h) => p2pkh_output_script(h),
      Address::ScriptHash(h) => {
        let mut b = vec![OP_HASH160, 0x14];
        b.extend_from_slice(h);
        b.push(OP_EQUAL);
        Script(b)
      }
    }
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Address::PubKeyHash(h) => write!(f, "pkh:{}", hex::encode(h)),
      Address::ScriptHash(h) => write!(f, "sh:{}", hex::encode(h)),
    }
  }
}

/// `[pushes de compromisos] [OP_DROP x n] OP_DUP OP_HASH160 <pkh>
/// OP_EQUALVERIFY OP_CHECKSIG`.
///
/// Los compromisos quedan documentados en la cadena al gastar la salida sin
/// afectar a la condición de bloqueo, que sigue siendo la firma de la clave.
pub fn redeem_script(pubkey_hash: &[u8; 20], commitments: &[Vec<u8>]) -> Script {
  let mut chunks: Vec<ScriptChunk> = commitments.iter().map(|c| ScriptChunk::Push(c.clone())).collect();
  chunks.extend(commitments.iter().map(|_| ScriptChunk::Op(OP_DROP)));
  chunks.push(ScriptChunk::Op(OP_DUP));
  chunks.push(ScriptChunk::Op(OP_HASH160));
  chunks.push(ScriptChunk::Push(pubkey_hash.to_vec()));
  chunks.push(ScriptChunk::Op(OP_EQUALVERIFY));
  chunks.push(ScriptChunk::Op(OP_CHECKSIG));
  Script::from_chunks(&chunks)
}

pub fn redeem_script_for_key(key: &PublicKey, commitments: &[Vec<u8>]) -> Script {
  redeem_script(&key.pubkey_hash(), commitments)
}

/// Extrae el hash de clave de un redeem script de compromiso + bloqueo.
pub fn redeem_script_pubkey_hash(redeem: &Script) -> Option<[u8; 20]> {
  let chunks = redeem.chunks().ok()?;
  let n = chunks.len();
  if n < 5 {
    return None;
  }
  match &chunks[n - 5..] {
    [ScriptChunk::Op(OP_DUP), ScriptChunk::Op(OP_HASH160), ScriptChunk::Push(h), ScriptChunk::Op(OP_EQUALVERIFY), ScriptChunk::Op(OP_CHECKSIG)]
      if h.len() == 20 =>
    {
      let mut out = [0u8; 20];
      out.copy_from_slice(h);
      Some(out)
    }
    _ => None,
  }
}

pub fn p2sh_address(redeem: &Script) -> Address {
  Address::ScriptHash(hash160(redeem.as_bytes()))
}

pub fn p2sh_output_script(redeem: &Script) -> Script {
  p2sh_address(redeem).script_pubkey()
}

pub fn p2pkh_output_script(pubkey_hash: &[u8; 20]) -> Script {
  let mut b = vec![OP_DUP, OP_HASH160, 0x14];
  b.extend_from_slice(pubkey_hash);
  b.push(OP_EQUALVERIFY);
  b.push(OP_CHECKSIG);
  Script(b)
}

pub fn data_carrier_script(data: &[u8]) -> Result<Script, DomainError> {
  if data.len() > MAX_DATA_CARRIER_LEN {
    return Err(DomainError::ValidationError(format!("Salida de datos de {} bytes excede {}", data.len(), MAX_DATA_CARRIER_LEN)));
  }
  Ok(Script::from_chunks(&[ScriptChunk::Op(OP_RETURN), ScriptChunk::Push(data.to_vec())]))
}

/// Script de desbloqueo de la plantilla: `[pubkey, redeem]`, sin firma.
pub fn template_unlock_script(key: &PublicKey, redeem: &Script) -> Script {
  Script::from_chunks(&[ScriptChunk::Push(key.as_bytes().to_vec()), ScriptChunk::Push(redeem.as_bytes().to_vec())])
}

/// Script de desbloqueo final: `[firma DER + SIGHASH_ALL, pubkey, redeem]`.
pub fn final_unlock_script(signature_with_hashtype: &[u8], key: &PublicKey, redeem: &Script) -> Script {
  Script::from_chunks(&[ScriptChunk::Push(signature_with_hashtype.to_vec()),
                        ScriptChunk::Push(key.as_bytes().to_vec()),
                        ScriptChunk::Push(redeem.as_bytes().to_vec())])
}

/// Script de desbloqueo P2PKH: `[firma DER + SIGHASH_ALL, pubkey]`.
pub fn p2pkh_unlock_script(signature_with_hashtype: &[u8], key: &PublicKey) -> Script {
  Script::from_chunks(&[ScriptChunk::Push(signature_with_hashtype.to_vec()), ScriptChunk::Push(key.as_bytes().to_vec())])
}

/// Dirección P2SH que una parte expone para (clave, compromisos previos).
pub fn exposed_address(key: &PublicKey, commitments: &[Vec<u8>]) -> Address {
  p2sh_address(&redeem_script_for_key(key, commitments))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redeem_script_layout_with_two_commitments() {
    let pkh = [7u8; 20];
    let s = redeem_script(&pkh, &[vec![1u8; 20], vec![2u8; 3]]);
    let chunks = s.chunks().unwrap();
    assert_eq!(chunks.len(), 9);
    assert_eq!(chunks[2], ScriptChunk::Op(OP_DROP));
    assert_eq!(chunks[3], ScriptChunk::Op(OP_DROP));
    assert_eq!(redeem_script_pubkey_hash(&s), Some(pkh));
  }

  #[test]
  fn p2sh_wrapper_is_recognized() {
    let redeem = redeem_script(&[1u8; 20], &[]);
    let out = p2sh_output_script(&redeem);
    assert!(out.is_p2sh());
    assert!(!out.is_p2pkh());
    assert_eq!(out.address(), Some(p2sh_address(&redeem)));
  }

  #[test]
  fn data_carrier_payload_extracts_pushed_bytes() {
    let s = data_carrier_script(&[9u8; 80]).unwrap();
    assert_eq!(s.data_carrier_payload().unwrap(), vec![9u8; 80]);
    assert!(data_carrier_script(&[0u8; 81]).is_err());
  }
}
