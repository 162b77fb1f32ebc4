// builder.rs
// Construcción de las cinco formas de transacción del protocolo. Cada
// método clasifica su propio resultado antes de devolverlo.
use crate::classifier::classify;
use crate::data_block::encode;
use crate::handover::HandoverData;
use crate::keys::{PublicKey, TransactionSigner};
use crate::offchain;
use crate::reference::{LocalTransaction, TransactionReference};
use crate::script::{data_carrier_script, final_unlock_script, p2sh_output_script, redeem_script_for_key,
                    template_unlock_script, Address, Script, SIGHASH_ALL};
use crate::transaction::{OutPoint, Transaction, TxIn, TxOut};
use crate::workflow::{HandoverKind, WorkflowHandoverData};
use crate::DomainError;

/// Bytes reservados por cada firma que falta en el cálculo de comisión.
pub const SIG_SIZE: usize = 75;

/// Comisión por defecto en satoshis por kilobyte.
pub const DEFAULT_FEE_PER_KB: u64 = 5_000;

/// Salida con token lista para ser gastada: outpoint, salida, clave y el
/// redeem script que la desbloquea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableToken {
  pub outpoint: OutPoint,
  pub output: TxOut,
  pub key: PublicKey,
  pub redeem: Script,
}

impl SpendableToken {
  pub fn from_handover(prev: &HandoverData, output_index: u32) -> Result<Self, DomainError> {
    let reference = prev.reference()
                        .ok_or_else(|| DomainError::ValidationError("El paso previo no tiene transacción".to_string()))?;
    if !reference.token_output_indices().contains(&output_index) {
      return Err(DomainError::ValidationError(format!("La salida {} no porta el token", output_index)));
    }
    let idx = output_index as usize;
    let script = reference.output_script(idx)
                          .cloned()
                          .ok_or_else(|| DomainError::ValidationError(format!("Salida {} inexistente", output_index)))?;
    let value = reference.output_value(idx).unwrap_or(0);
    let key = prev.key_for_output(output_index)?.clone();
    let redeem = redeem_script_for_key(&key, &prev.commitments_for_output(output_index));
    if p2sh_output_script(&redeem) != script {
      return Err(DomainError::Internal(format!("El redeem script no corresponde a la salida {}", output_index)));
    }
    Ok(Self { outpoint: OutPoint { txid: reference.tx_hash(), vout: output_index },
              output: TxOut { value, script_pubkey: script },
              key,
              redeem })
  }

  pub fn template_unlock(&self) -> Script {
    template_unlock_script(&self.key, &self.redeem)
  }
}

/// Reparte `value` en `n` porciones iguales; el resto va a la última.
pub fn distribute_equally(value: u64, n: usize) -> Vec<u64> {
  if n == 0 {
    return Vec::new();
  }
  let portion = value / n as u64;
  let mut out = vec![portion; n];
  out[n - 1] += value - portion * n as u64;
  out
}

#[derive(Debug, Clone, Copy)]
pub struct ShapeBuilder {
  fee_per_kb: u64,
}

impl Default for ShapeBuilder {
  fn default() -> Self {
    Self::new(DEFAULT_FEE_PER_KB)
  }
}

impl ShapeBuilder {
  pub fn new(fee_per_kb: u64) -> Self {
    Self { fee_per_kb }
  }

  pub fn fee_per_kb(&self) -> u64 {
    self.fee_per_kb
  }

  /// `size = serializado + n_scripts * SIG_SIZE + unlock_len`, con los
  /// scripts de desbloqueo aún vacíos.
  pub fn fee_for(&self, tx: &Transaction, n_scripts: usize, unlock_len: usize) -> u64 {
    let size = tx.serialize().len() + n_scripts * SIG_SIZE + unlock_len;
    self.fee_per_kb * size as u64 / 1000
  }

  /// Transacción START sin fondos: salida P2SH con el token y salida de
  /// datos. La billetera añade inputs y cambio.
  pub fn start_skeleton(&self, whd: &WorkflowHandoverData, key: &PublicKey, token_size: u64) -> Result<Transaction, DomainError> {
    expect_kind(whd, HandoverKind::Start)?;
    let mut tx = Transaction::new();
    tx.outputs.push(TxOut { value: token_size, script_pubkey: p2sh_output_script(&redeem_script_for_key(key, &[])) });
    tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&encode(whd, None)?)? });
    Ok(tx)
  }

  pub fn start_handover(&self,
                        whd: &WorkflowHandoverData,
                        key: &PublicKey,
                        funded: LocalTransaction,
                        token_size: u64)
                        -> Result<HandoverData, DomainError> {
    expect_shape(&funded, HandoverKind::Start)?;
    let token = funded.transaction
                      .outputs
                      .iter()
                      .position(|o| o.value == token_size && o.script_pubkey.is_p2sh())
                      .ok_or_else(|| DomainError::Internal("No se encontró la salida con el token".to_string()))?;
    let reference = TransactionReference::local(funded, vec![token as u32]);
    HandoverData::new(whd.clone(), Some(reference), vec![key.clone()], vec![Vec::new()], true, false)
  }

  /// Plantilla de handover del emisor: el token pasa a
  /// P2SH(clave del receptor, hash160 del payload) y el input lleva
  /// `[pubkey, redeem]` sin firma.
  pub fn handover_template(&self,
                           whd: &WorkflowHandoverData,
                           prev: &SpendableToken,
                           receiver: &PublicKey)
                           -> Result<HandoverData, DomainError> {
    expect_kind(whd, HandoverKind::Intermediate)?;
    let commitments = whd.commitments();
    let mut tx = Transaction::new();
    tx.inputs.push(TxIn::new(prev.outpoint));
    tx.outputs.push(TxOut { value: prev.output.value,
                            script_pubkey: p2sh_output_script(&redeem_script_for_key(receiver, &commitments)) });
    tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&encode(whd, None)?)? });
    let unlock = prev.template_unlock();
    let fee = self.fee_for(&tx, 1, unlock.len());
    tx.outputs[0].value = subtract_fee(prev.output.value, fee)?;
    tx.inputs[0].script_sig = unlock;

    let local = LocalTransaction::new(tx, vec![Some(prev.output.clone())]);
    expect_shape(&local, HandoverKind::Intermediate)?;
    HandoverData::new(whd.clone(),
                      Some(TransactionReference::local(local, vec![0])),
                      vec![receiver.clone()],
                      vec![commitments],
                      true,
                      true)
  }

  /// Completa la plantilla del emisor: incrusta la firma off-chain, firma el
  /// input con la clave previa y verifica ambas firmas.
  pub fn finish_handover_template(&self,
                                  template: &HandoverData,
                                  prev: &SpendableToken,
                                  off_chain_signature: &[u8],
                                  signer: &dyn TransactionSigner)
                                  -> Result<HandoverData, DomainError> {
    let local = template_local(template)?;
    let mut tx = local.transaction.clone();
    offchain::embed_signature(&mut tx, off_chain_signature)?;
    sign_input(&mut tx, 0, prev, signer)?;
    let receiver = template.keys()
                           .first()
                           .ok_or_else(|| DomainError::ValidationError("La plantilla no tiene clave de receptor".to_string()))?;
    offchain::verify(&tx, receiver, off_chain_signature)?;
    let local = LocalTransaction::new(tx, local.connected_outputs.clone());
    expect_shape(&local, HandoverKind::Intermediate)?;
    template.clone_with_reference(TransactionReference::local(local, vec![0]), false)
  }

  /// Reconstruye en el receptor la transacción publicada a partir de su
  /// copia de la plantilla, el script de desbloqueo publicado y su propia
  /// firma off-chain. El llamador compara el hash resultante.
  pub fn finish_template_on_receiver_side(&self,
                                          template: &HandoverData,
                                          published_unlock: &Script,
                                          own_signature: &[u8])
                                          -> Result<HandoverData, DomainError> {
    let local = template_local(template)?;
    let mut tx = local.transaction.clone();
    offchain::embed_signature(&mut tx, own_signature)?;
    tx.inputs[0].script_sig = published_unlock.clone();
    let local = LocalTransaction::new(tx, local.connected_outputs.clone());
    expect_shape(&local, HandoverKind::Intermediate)?;
    template.clone_with_reference(TransactionReference::local(local, vec![0]), false)
  }

  /// Divide el token en `keys.len()` salidas P2SH (N >= 2).
  pub fn split(&self,
               whd: &WorkflowHandoverData,
               prev: &SpendableToken,
               keys: &[PublicKey],
               signer: &dyn TransactionSigner)
               -> Result<HandoverData, DomainError> {
    expect_kind(whd, HandoverKind::Split)?;
    let n = keys.len();
    if n < 2 {
      return Err(DomainError::ValidationError(format!("Un split necesita al menos 2 salidas, se pidieron {}", n)));
    }
    let values = distribute_equally(prev.output.value, n);
    let mut tx = Transaction::new();
    tx.inputs.push(TxIn::new(prev.outpoint));
    for (key, value) in keys.iter().zip(&values) {
      tx.outputs.push(TxOut { value: *value, script_pubkey: p2sh_output_script(&redeem_script_for_key(key, &[])) });
    }
    tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&encode(whd, None)?)? });
    let fee = self.fee_for(&tx, 1, prev.template_unlock().len());
    for (out, fee_part) in tx.outputs.iter_mut().zip(distribute_equally(fee, n)) {
      out.value = subtract_fee(out.value, fee_part)?;
    }
    sign_input(&mut tx, 0, prev, signer)?;

    let local = LocalTransaction::new(tx, vec![Some(prev.output.clone())]);
    expect_shape(&local, HandoverKind::Split)?;
    HandoverData::new(whd.clone(),
                      Some(TransactionReference::local(local, (0..n as u32).collect())),
                      keys.to_vec(),
                      vec![Vec::new(); n],
                      true,
                      false)
  }

  /// Une M tokens en una sola salida P2SH.
  pub fn join(&self,
              whd: &WorkflowHandoverData,
              prevs: &[SpendableToken],
              key: &PublicKey,
              signer: &dyn TransactionSigner)
              -> Result<HandoverData, DomainError> {
    expect_kind(whd, HandoverKind::Join)?;
    if prevs.len() < 2 {
      return Err(DomainError::ValidationError(format!("Un join necesita al menos 2 entradas, se recibieron {}", prevs.len())));
    }
    let total: u64 = prevs.iter().map(|p| p.output.value).sum();
    let mut tx = Transaction::new();
    tx.inputs.extend(prevs.iter().map(|p| TxIn::new(p.outpoint)));
    tx.outputs.push(TxOut { value: total, script_pubkey: p2sh_output_script(&redeem_script_for_key(key, &[])) });
    tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&encode(whd, None)?)? });
    let unlock_len: usize = prevs.iter().map(|p| p.template_unlock().len()).sum();
    let fee = self.fee_for(&tx, prevs.len(), unlock_len);
    tx.outputs[0].value = subtract_fee(total, fee)?;
    for (i, prev) in prevs.iter().enumerate() {
      sign_input(&mut tx, i, prev, signer)?;
    }

    let connected = prevs.iter().map(|p| Some(p.output.clone())).collect();
    let local = LocalTransaction::new(tx, connected);
    expect_shape(&local, HandoverKind::Join)?;
    HandoverData::new(whd.clone(),
                      Some(TransactionReference::local(local, vec![0])),
                      vec![key.clone()],
                      vec![Vec::new()],
                      true,
                      false)
  }

  /// Cierra el workflow pagando el token a una dirección de la billetera.
  pub fn end(&self,
             whd: &WorkflowHandoverData,
             prev: &SpendableToken,
             destination: &Address,
             signer: &dyn TransactionSigner)
             -> Result<HandoverData, DomainError> {
    expect_kind(whd, HandoverKind::End)?;
    if destination.is_p2sh() {
      return Err(DomainError::ValidationError("El destino de un END no puede ser P2SH".to_string()));
    }
    let mut tx = Transaction::new();
    tx.inputs.push(TxIn::new(prev.outpoint));
    tx.outputs.push(TxOut { value: prev.output.value, script_pubkey: destination.script_pubkey() });
    tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&encode(whd, None)?)? });
    let fee = self.fee_for(&tx, 1, prev.template_unlock().len());
    tx.outputs[0].value = subtract_fee(prev.output.value, fee)?;
    sign_input(&mut tx, 0, prev, signer)?;

    let local = LocalTransaction::new(tx, vec![Some(prev.output.clone())]);
    expect_shape(&local, HandoverKind::End)?;
    HandoverData::new(whd.clone(), Some(TransactionReference::local(local, Vec::new())), Vec::new(), Vec::new(), true, false)
  }
}

fn expect_kind(whd: &WorkflowHandoverData, kind: HandoverKind) -> Result<(), DomainError> {
  if whd.kind() != kind {
    return Err(DomainError::ValidationError(format!("Se esperaban metadatos {} y se recibieron {}", kind, whd.kind())));
  }
  Ok(())
}

fn expect_shape(local: &LocalTransaction, kind: HandoverKind) -> Result<(), DomainError> {
  let found = classify(&local.transaction, &local.connected_scripts())
    .map_err(|e| DomainError::Internal(format!("la transacción {} construida no se reconoce: {}", kind, e)))?;
  if found != kind {
    return Err(DomainError::Internal(format!("se construyó {} pero se reconoce como {}", kind, found)));
  }
  Ok(())
}

fn template_local(template: &HandoverData) -> Result<&LocalTransaction, DomainError> {
  template.reference()
          .and_then(|r| r.local_transaction())
          .ok_or_else(|| DomainError::ValidationError("La plantilla no contiene una transacción local".to_string()))
}

fn subtract_fee(value: u64, fee: u64) -> Result<u64, DomainError> {
  value.checked_sub(fee)
       .ok_or_else(|| DomainError::ValidationError(format!("Valor {} insuficiente para la comisión {}", value, fee)))
}

/// Firma SIGHASH_ALL del input y verificación contra la salida conectada.
fn sign_input(tx: &mut Transaction, index: usize, token: &SpendableToken, signer: &dyn TransactionSigner) -> Result<(), DomainError> {
  let digest = tx.signature_hash(index, &token.redeem)?;
  let mut sig = signer.sign_digest(&token.key, &digest)?;
  sig.push(SIGHASH_ALL);
  tx.inputs[index].script_sig = final_unlock_script(&sig, &token.key, &token.redeem);
  tx.verify_p2sh_input(index, &token.output.script_pubkey)
}
