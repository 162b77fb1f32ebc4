// offchain.rs
// Hash canónico de una transacción INTERMEDIATE para la firma off-chain
// del receptor. La canonicalización elimina lo que el emisor añade después
// de recibir la firma: la firma on-chain del input 0 y la firma off-chain
// dentro del bloque de datos.
use crate::classifier::is_intermediate;
use crate::data_block::{encode, strip_signature};
use crate::hashing::double_sha256;
use crate::keys::{PublicKey, TransactionSigner, COMPRESSED_KEY_LEN};
use crate::script::{data_carrier_script, Script, ScriptChunk};
use crate::transaction::Transaction;
use crate::DomainError;

/// Copia canonicalizada de la transacción.
pub fn canonical_transaction(tx: &Transaction) -> Result<Transaction, DomainError> {
  let block = is_intermediate(tx, &[]).ok_or_else(|| {
                                        DomainError::UnrecognizedStructure("la firma off-chain requiere una transacción INTERMEDIATE".to_string())
                                      })?;
  let mut copy = tx.clone();
  let chunks = copy.inputs[0].script_sig.chunks()?;
  if let Some(ScriptChunk::Push(first)) = chunks.first() {
    if first.len() != COMPRESSED_KEY_LEN {
      copy.inputs[0].script_sig = Script::from_chunks(&chunks[1..]);
    }
  }
  if block.has_signature() {
    let payload = copy.outputs[1].script_pubkey
                                 .data_carrier_payload()
                                 .ok_or_else(|| DomainError::Internal("salida de datos ilegible".to_string()))?;
    copy.outputs[1].script_pubkey = data_carrier_script(&strip_signature(&payload)?)?;
  }
  Ok(copy)
}

pub fn canonical_hash(tx: &Transaction) -> Result<[u8; 32], DomainError> {
  Ok(double_sha256(&canonical_transaction(tx)?.serialize()))
}

pub fn sign(tx: &Transaction, key: &PublicKey, signer: &dyn TransactionSigner) -> Result<Vec<u8>, DomainError> {
  signer.sign_digest(key, &canonical_hash(tx)?)
}

pub fn verify(tx: &Transaction, key: &PublicKey, signature: &[u8]) -> Result<(), DomainError> {
  key.verify_digest(&canonical_hash(tx)?, signature)
}

/// Sustituye la salida de datos por el bloque firmado con `signature`.
pub fn embed_signature(tx: &mut Transaction, signature: &[u8]) -> Result<(), DomainError> {
  let block = is_intermediate(tx, &[]).ok_or_else(|| DomainError::UnrecognizedStructure("se esperaba INTERMEDIATE".to_string()))?;
  let payload = encode(&block.to_handover_data(), Some(signature))?;
  tx.outputs[1].script_pubkey = data_carrier_script(&payload)?;
  Ok(())
}
