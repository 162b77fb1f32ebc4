// classifier.rs
// Reconocimiento de la forma estructural de una transacción. Las formas se
// prueban en orden de prioridad y gana la primera que encaja.
use crate::data_block::{decode, DataBlock};
use crate::reference::TransactionReference;
use crate::script::Script;
use crate::transaction::Transaction;
use crate::workflow::HandoverKind;
use crate::DomainError;

/// Un input es P2SH si el script conectado lo es; si no se conoce, no se
/// puede verificar y se acepta.
fn input_is_p2sh(connected: &[Option<Script>], index: usize) -> bool {
  match connected.get(index) {
    Some(Some(s)) => s.is_p2sh(),
    _ => true,
  }
}

fn decode_carrier(script: &Script, kind: HandoverKind) -> Option<DataBlock> {
  let payload = script.data_carrier_payload()?;
  decode(&payload).ok().filter(|b| b.kind == kind)
}

pub fn is_intermediate(tx: &Transaction, connected: &[Option<Script>]) -> Option<DataBlock> {
  if tx.inputs.len() != 1 || !input_is_p2sh(connected, 0) || tx.outputs.len() != 2 {
    return None;
  }
  if !tx.outputs[0].script_pubkey.is_p2sh() {
    return None;
  }
  decode_carrier(&tx.outputs[1].script_pubkey, HandoverKind::Intermediate)
}

pub fn is_start(tx: &Transaction) -> Option<DataBlock> {
  if tx.outputs.len() < 2 || tx.outputs.len() > 3 || !tx.outputs[0].script_pubkey.is_p2sh() {
    return None;
  }
  decode_carrier(&tx.outputs[1].script_pubkey, HandoverKind::Start)
}

pub fn is_end(tx: &Transaction, connected: &[Option<Script>]) -> Option<DataBlock> {
  if tx.inputs.len() != 1 || !input_is_p2sh(connected, 0) || tx.outputs.len() != 2 {
    return None;
  }
  tx.outputs.iter().find_map(|o| decode_carrier(&o.script_pubkey, HandoverKind::End))
}

pub fn is_split(tx: &Transaction, connected: &[Option<Script>]) -> Option<DataBlock> {
  if tx.inputs.len() != 1 || !input_is_p2sh(connected, 0) || tx.outputs.len() < 3 {
    return None;
  }
  let (last, tokens) = tx.outputs.split_last()?;
  if !tokens.iter().all(|o| o.script_pubkey.is_p2sh()) {
    return None;
  }
  decode_carrier(&last.script_pubkey, HandoverKind::Split)
}

pub fn is_join(tx: &Transaction, connected: &[Option<Script>]) -> Option<DataBlock> {
  if tx.inputs.len() < 2 || tx.outputs.len() != 2 {
    return None;
  }
  if !(0..tx.inputs.len()).all(|i| input_is_p2sh(connected, i)) || !tx.outputs[0].script_pubkey.is_p2sh() {
    return None;
  }
  decode_carrier(&tx.outputs[1].script_pubkey, HandoverKind::Join)
}

/// Devuelve el tipo y el bloque de datos decodificado.
pub fn inspect(tx: &Transaction, connected: &[Option<Script>]) -> Result<(HandoverKind, DataBlock), DomainError> {
  let found = is_intermediate(tx, connected).or_else(|| is_start(tx))
                                            .or_else(|| is_end(tx, connected))
                                            .or_else(|| is_split(tx, connected))
                                            .or_else(|| is_join(tx, connected));
  match found {
    Some(block) => Ok((block.kind, block)),
    None => Err(DomainError::UnrecognizedStructure(format!("{} inputs, {} outputs", tx.inputs.len(), tx.outputs.len()))),
  }
}

pub fn classify(tx: &Transaction, connected: &[Option<Script>]) -> Result<HandoverKind, DomainError> {
  inspect(tx, connected).map(|(k, _)| k)
}

pub fn classify_reference(reference: &TransactionReference) -> Result<(HandoverKind, DataBlock), DomainError> {
  inspect(&reference.transaction(), &reference.connected_scripts())
}

/// Índices de salidas con token según la forma.
pub fn token_outputs_for(kind: HandoverKind, tx: &Transaction) -> Vec<u32> {
  match kind {
    HandoverKind::Split => (0..tx.outputs.len().saturating_sub(1) as u32).collect(),
    HandoverKind::End => Vec::new(),
    _ => vec![0],
  }
}
