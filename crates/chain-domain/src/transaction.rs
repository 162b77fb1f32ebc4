// transaction.rs
// Modelo mínimo de transacción legacy compatible con Bitcoin: serialización
// canónica, txid, digest SIGHASH_ALL y verificación de gastos P2SH/P2PKH.
use crate::hashing::{double_sha256, hash160};
use crate::keys::PublicKey;
use crate::script::{redeem_script_pubkey_hash, Script, ScriptChunk, SIGHASH_ALL};
use crate::DomainError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hash de transacción en orden interno; se muestra invertido como en los
/// exploradores.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash([u8; 32]);

impl TxHash {
  pub fn from_internal(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn as_internal(&self) -> &[u8; 32] {
    &self.0
  }
}

impl fmt::Display for TxHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut rev = self.0;
    rev.reverse();
    write!(f, "{}", hex::encode(rev))
  }
}

impl fmt::Debug for TxHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "TxHash({})", self)
  }
}

impl FromStr for TxHash {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
      return Err(DomainError::SerializationError(format!("hash de {} bytes", bytes.len())));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out.reverse();
    Ok(Self(out))
  }
}

impl Serialize for TxHash {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for TxHash {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
  pub txid: TxHash,
  pub vout: u32,
}

impl fmt::Display for OutPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.txid, self.vout)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
  pub previous_output: OutPoint,
  pub script_sig: Script,
  pub sequence: u32,
}

impl TxIn {
  pub fn new(previous_output: OutPoint) -> Self {
    Self { previous_output, script_sig: Script::default(), sequence: u32::MAX }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
  pub value: u64,
  pub script_pubkey: Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
  pub version: i32,
  pub inputs: Vec<TxIn>,
  pub outputs: Vec<TxOut>,
  pub lock_time: u32,
}

impl Default for Transaction {
  fn default() -> Self {
    Self::new()
  }
}

impl Transaction {
  pub fn new() -> Self {
    Self { version: 1, inputs: Vec::new(), outputs: Vec::new(), lock_time: 0 }
  }

  pub fn serialize(&self) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(&self.version.to_le_bytes());
    write_varint(&mut buf, self.inputs.len() as u64);
    for input in &self.inputs {
      buf.extend_from_slice(input.previous_output.txid.as_internal());
      buf.extend_from_slice(&input.previous_output.vout.to_le_bytes());
      write_varint(&mut buf, input.script_sig.len() as u64);
      buf.extend_from_slice(input.script_sig.as_bytes());
      buf.extend_from_slice(&input.sequence.to_le_bytes());
    }
    write_varint(&mut buf, self.outputs.len() as u64);
    for output in &self.outputs {
      buf.extend_from_slice(&output.value.to_le_bytes());
      write_varint(&mut buf, output.script_pubkey.len() as u64);
      buf.extend_from_slice(output.script_pubkey.as_bytes());
    }
    buf.extend_from_slice(&self.lock_time.to_le_bytes());
    buf
  }

  pub fn deserialize(bytes: &[u8]) -> Result<Self, DomainError> {
    let mut r = Reader { bytes, pos: 0 };
    let version = i32::from_le_bytes(r.array::<4>()?);
    let n_in = r.varint()?;
    let mut inputs = Vec::new();
    for _ in 0..n_in {
      let txid = TxHash(r.array::<32>()?);
      let vout = u32::from_le_bytes(r.array::<4>()?);
      let len = r.varint()? as usize;
      let script_sig = Script::new(r.take(len)?.to_vec());
      let sequence = u32::from_le_bytes(r.array::<4>()?);
      inputs.push(TxIn { previous_output: OutPoint { txid, vout }, script_sig, sequence });
    }
    let n_out = r.varint()?;
    let mut outputs = Vec::new();
    for _ in 0..n_out {
      let value = u64::from_le_bytes(r.array::<8>()?);
      let len = r.varint()? as usize;
      outputs.push(TxOut { value, script_pubkey: Script::new(r.take(len)?.to_vec()) });
    }
    let lock_time = u32::from_le_bytes(r.array::<4>()?);
    if r.pos != bytes.len() {
      return Err(DomainError::SerializationError("bytes sobrantes tras la transacción".to_string()));
    }
    Ok(Self { version, inputs, outputs, lock_time })
  }

  pub fn txid(&self) -> TxHash {
    TxHash(double_sha256(&self.serialize()))
  }

  pub fn total_output_value(&self) -> u64 {
    self.outputs.iter().map(|o| o.value).sum()
  }

  /// Digest legacy SIGHASH_ALL del input `index`, usando `subscript` como
  /// script del input firmado y vaciando el resto.
  pub fn signature_hash(&self, index: usize, subscript: &Script) -> Result<[u8; 32], DomainError> {
    if index >= self.inputs.len() {
      return Err(DomainError::ValidationError(format!("Input {} inexistente", index)));
    }
    let mut copy = self.clone();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
      input.script_sig = if i == index { subscript.clone() } else { Script::default() };
    }
    let mut buf = copy.serialize();
    buf.extend_from_slice(&u32::from(SIGHASH_ALL).to_le_bytes());
    Ok(double_sha256(&buf))
  }

  /// Verifica `[firma, pubkey, redeem]` contra la salida P2SH conectada.
  pub fn verify_p2sh_input(&self, index: usize, connected: &Script) -> Result<(), DomainError> {
    let input = self.inputs
                    .get(index)
                    .ok_or_else(|| DomainError::ValidationError(format!("Input {} inexistente", index)))?;
    let chunks = input.script_sig.chunks()?;
    let (sig, key, redeem) = match chunks.as_slice() {
      [ScriptChunk::Push(s), ScriptChunk::Push(k), ScriptChunk::Push(r)] => (s, k, Script::new(r.clone())),
      _ => return Err(DomainError::SignatureMismatch(format!("input {}: se esperaban [firma, clave, redeem]", index))),
    };
    if !connected.is_p2sh() || connected.as_bytes()[2..22] != hash160(redeem.as_bytes()) {
      return Err(DomainError::SignatureMismatch(format!("input {}: el redeem script no corresponde a la salida", index)));
    }
    let key = PublicKey::from_bytes(key)?;
    if redeem_script_pubkey_hash(&redeem) != Some(key.pubkey_hash()) {
      return Err(DomainError::SignatureMismatch(format!("input {}: la clave no desbloquea el redeem script", index)));
    }
    self.verify_signature(index, sig, &key, &redeem)
  }

  /// Verifica `[firma, pubkey]` contra una salida P2PKH conectada.
  pub fn verify_p2pkh_input(&self, index: usize, connected: &Script) -> Result<(), DomainError> {
    let input = self.inputs
                    .get(index)
                    .ok_or_else(|| DomainError::ValidationError(format!("Input {} inexistente", index)))?;
    let chunks = input.script_sig.chunks()?;
    let (sig, key) = match chunks.as_slice() {
      [ScriptChunk::Push(s), ScriptChunk::Push(k)] => (s, k),
      _ => return Err(DomainError::SignatureMismatch(format!("input {}: se esperaban [firma, clave]", index))),
    };
    let key = PublicKey::from_bytes(key)?;
    if !connected.is_p2pkh() || connected.as_bytes()[3..23] != key.pubkey_hash() {
      return Err(DomainError::SignatureMismatch(format!("input {}: la clave no corresponde a la salida", index)));
    }
    self.verify_signature(index, sig, &key, connected)
  }

  fn verify_signature(&self, index: usize, sig: &[u8], key: &PublicKey, subscript: &Script) -> Result<(), DomainError> {
    match sig.split_last() {
      Some((&SIGHASH_ALL, der)) => {
        let digest = self.signature_hash(index, subscript)?;
        key.verify_digest(&digest, der)
      }
      _ => Err(DomainError::SignatureMismatch(format!("input {}: tipo de hash de firma no soportado", index))),
    }
  }
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
  if n < 0xfd {
    buf.push(n as u8);
  } else if n <= 0xffff {
    buf.push(0xfd);
    buf.extend_from_slice(&(n as u16).to_le_bytes());
  } else if n <= 0xffff_ffff {
    buf.push(0xfe);
    buf.extend_from_slice(&(n as u32).to_le_bytes());
  } else {
    buf.push(0xff);
    buf.extend_from_slice(&n.to_le_bytes());
  }
}

struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn take(&mut self, n: usize) -> Result<&'a [u8], DomainError> {
    let end = self.pos.checked_add(n).filter(|e| *e <= self.bytes.len());
    match end {
      Some(end) => {
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
      }
      None => Err(DomainError::SerializationError("transacción truncada".to_string())),
    }
  }

  fn array<const N: usize>(&mut self) -> Result<[u8; N], DomainError> {
    let mut out = [0u8; N];
    out.copy_from_slice(self.take(N)?);
    Ok(out)
  }

  fn varint(&mut self) -> Result<u64, DomainError> {
    let first = self.array::<1>()?[0];
    Ok(match first {
      0xfd => u64::from(u16::from_le_bytes(self.array::<2>()?)),
      0xfe => u64::from(u32::from_le_bytes(self.array::<4>()?)),
      0xff => u64::from_le_bytes(self.array::<8>()?),
      n => u64::from(n),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Transaction {
    let mut tx = Transaction::new();
    tx.inputs.push(TxIn::new(OutPoint { txid: TxHash::from_internal([3u8; 32]), vout: 1 }));
    tx.outputs.push(TxOut { value: 1_000, script_pubkey: Script::new(vec![0x6a, 0x01, 0x05]) });
    tx
  }

  #[test]
  fn wire_format_round_trip() {
    let tx = sample();
    let bytes = tx.serialize();
    assert_eq!(Transaction::deserialize(&bytes).unwrap(), tx);
    assert!(Transaction::deserialize(&bytes[..bytes.len() - 1]).is_err());
  }

  #[test]
  fn txid_display_is_reversed_hex() {
    let h = sample().txid();
    let parsed: TxHash = h.to_string().parse().unwrap();
    assert_eq!(parsed, h);
    let mut internal = *h.as_internal();
    internal.reverse();
    assert_eq!(hex::encode(internal), h.to_string());
  }
}
