// reference.rs
// Referencia a la transacción de un paso: construida localmente (completa,
// con sus salidas gastadas) o conocida sólo a través del explorador.
use crate::script::{Address, Script};
use crate::transaction::{OutPoint, Transaction, TxHash, TxIn, TxOut};
use crate::DomainError;
use serde::{Deserialize, Serialize};

/// Input tal como lo reporta el explorador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInput {
  pub prev_hash: TxHash,
  pub prev_index: u32,
  pub script: Script,
  pub value: u64,
  #[serde(default)]
  pub addresses: Vec<Address>,
  /// Script de la salida gastada, si el explorador lo conoce.
  #[serde(default)]
  pub prev_script: Option<Script>,
}

/// Output tal como lo reporta el explorador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedOutput {
  pub value: u64,
  pub script: Script,
  #[serde(default)]
  pub addresses: Vec<Address>,
  #[serde(default)]
  pub spent_by: Option<TxHash>,
}

/// Vista de una transacción publicada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTransaction {
  pub hash: TxHash,
  pub confirmations: u32,
  #[serde(default)]
  pub block_height: Option<u64>,
  pub inputs: Vec<ObservedInput>,
  pub outputs: Vec<ObservedOutput>,
}

impl ObservedTransaction {
  /// Reconstruye la transacción (versión 1, lock_time 0, secuencia final).
  pub fn to_transaction(&self) -> Transaction {
    let mut tx = Transaction::new();
    tx.inputs = self.inputs
                    .iter()
                    .map(|i| {
                      let mut input = TxIn::new(OutPoint { txid: i.prev_hash, vout: i.prev_index });
                      input.script_sig = i.script.clone();
                      input
                    })
                    .collect();
    tx.outputs = self.outputs
                     .iter()
                     .map(|o| TxOut { value: o.value, script_pubkey: o.script.clone() })
                     .collect();
    tx
  }

  pub fn connected_scripts(&self) -> Vec<Option<Script>> {
    self.inputs.iter().map(|i| i.prev_script.clone()).collect()
  }
}

/// Transacción construida localmente junto con las salidas que gasta
/// (alineadas por índice con sus inputs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTransaction {
  pub transaction: Transaction,
  pub connected_outputs: Vec<Option<TxOut>>,
}

impl LocalTransaction {
  pub fn new(transaction: Transaction, connected_outputs: Vec<Option<TxOut>>) -> Self {
    Self { transaction, connected_outputs }
  }

  pub fn connected_scripts(&self) -> Vec<Option<Script>> {
    (0..self.transaction.inputs.len()).map(|i| {
                                        self.connected_outputs
                                            .get(i)
                                            .and_then(|o| o.as_ref())
                                            .map(|o| o.script_pubkey.clone())
                                      })
                                      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TxSource {
  Local {
    tx: LocalTransaction,
    #[serde(default)]
    observed: Option<ObservedTransaction>,
  },
  Remote {
    observed: ObservedTransaction,
  },
}

/// Referencia con capacidad uniforme sobre ambos modos más los índices de
/// las salidas que portan el token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReference {
  source: TxSource,
  token_outputs: Vec<u32>,
}

impl TransactionReference {
  pub fn local(tx: LocalTransaction, token_outputs: Vec<u32>) -> Self {
    Self { source: TxSource::Local { tx, observed: None }, token_outputs }
  }

  pub fn remote(observed: ObservedTransaction, token_outputs: Vec<u32>) -> Self {
    Self { source: TxSource::Remote { observed }, token_outputs }
  }

  pub fn source(&self) -> &TxSource {
    &self.source
  }

  pub fn is_local(&self) -> bool {
    matches!(self.source, TxSource::Local { .. })
  }

  pub fn local_transaction(&self) -> Option<&LocalTransaction> {
    match &self.source {
      TxSource::Local { tx, .. } => Some(tx),
      TxSource::Remote { .. } => None,
    }
  }

  pub fn observed(&self) -> Option<&ObservedTransaction> {
    match &self.source {
      TxSource::Local { observed, .. } => observed.as_ref(),
      TxSource::Remote { observed } => Some(observed),
    }
  }

  /// Transacción completa; en modo remoto se reconstruye desde el explorador.
  pub fn transaction(&self) -> Transaction {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.clone(),
      TxSource::Remote { observed } => observed.to_transaction(),
    }
  }

  pub fn connected_scripts(&self) -> Vec<Option<Script>> {
    match &self.source {
      TxSource::Local { tx, .. } => tx.connected_scripts(),
      TxSource::Remote { observed } => observed.connected_scripts(),
    }
  }

  pub fn tx_hash(&self) -> TxHash {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.txid(),
      TxSource::Remote { observed } => observed.hash,
    }
  }

  pub fn input_count(&self) -> usize {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.inputs.len(),
      TxSource::Remote { observed } => observed.inputs.len(),
    }
  }

  pub fn output_count(&self) -> usize {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.outputs.len(),
      TxSource::Remote { observed } => observed.outputs.len(),
    }
  }

  pub fn output_script(&self, index: usize) -> Option<&Script> {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.outputs.get(index).map(|o| &o.script_pubkey),
      TxSource::Remote { observed } => observed.outputs.get(index).map(|o| &o.script),
    }
  }

  pub fn output_value(&self, index: usize) -> Option<u64> {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.outputs.get(index).map(|o| o.value),
      TxSource::Remote { observed } => observed.outputs.get(index).map(|o| o.value),
    }
  }

  pub fn output_address(&self, index: usize) -> Option<Address> {
    self.output_script(index).and_then(|s| s.address())
  }

  pub fn input_script(&self, index: usize) -> Option<&Script> {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.inputs.get(index).map(|i| &i.script_sig),
      TxSource::Remote { observed } => observed.inputs.get(index).map(|i| &i.script),
    }
  }

  pub fn prev_tx_hash_of_input(&self, index: usize) -> Option<TxHash> {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.inputs.get(index).map(|i| i.previous_output.txid),
      TxSource::Remote { observed } => observed.inputs.get(index).map(|i| i.prev_hash),
    }
  }

  pub fn outpoint_of_input(&self, index: usize) -> Option<OutPoint> {
    match &self.source {
      TxSource::Local { tx, .. } => tx.transaction.inputs.get(index).map(|i| i.previous_output),
      TxSource::Remote { observed } => {
        observed.inputs.get(index).map(|i| OutPoint { txid: i.prev_hash, vout: i.prev_index })
      }
    }
  }

  /// Script de la salida gastada por el input `index`, si se conoce.
  pub fn connected_output_script(&self, index: usize) -> Option<Script> {
    self.connected_scripts().get(index).cloned().flatten()
  }

  /// Hash de la transacción que gastó la salida `index`, según el explorador.
  pub fn spender_of_output(&self, index: usize) -> Option<TxHash> {
    self.observed().and_then(|o| o.outputs.get(index)).and_then(|o| o.spent_by)
  }

  pub fn confirmations(&self) -> u32 {
    self.observed().map(|o| o.confirmations).unwrap_or(0)
  }

  pub fn token_output_indices(&self) -> &[u32] {
    &self.token_outputs
  }

  pub fn output_with_token(&self) -> Option<u32> {
    self.token_outputs.first().copied()
  }

  /// `true` si la vista del explorador falta o alguna salida con token
  /// aún no tiene gastador conocido.
  pub fn needs_online_refresh(&self) -> bool {
    match self.observed() {
      None => true,
      Some(o) => {
        self.token_outputs
            .iter()
            .any(|i| o.outputs.get(*i as usize).map(|out| out.spent_by.is_none()).unwrap_or(true))
      }
    }
  }

  /// Incorpora la vista del explorador sin perder la transacción local.
  pub fn attach_observed(&mut self, fresh: ObservedTransaction) {
    match &mut self.source {
      TxSource::Local { observed, .. } => *observed = Some(fresh),
      TxSource::Remote { observed } => *observed = fresh,
    }
  }

  pub fn serialize(&self) -> Result<Vec<u8>, DomainError> {
    match &self.source {
      TxSource::Local { tx, .. } => Ok(tx.transaction.serialize()),
      TxSource::Remote { .. } => Err(DomainError::ValidationError("Sólo se serializan transacciones locales".to_string())),
    }
  }
}
