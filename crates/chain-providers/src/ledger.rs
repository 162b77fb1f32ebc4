// Archivo: ledger.rs
// Propósito: cadena en memoria compartida por varias billeteras. Valida
// gastos (P2SH y P2PKH), detecta dobles gastos, lleva la profundidad de
// confirmación y expone la vista de explorador. No es durable: sirve para
// pruebas y para la demo.
use crate::errors::Result;
use crate::traits::{BroadcastOutcome, Explorer};
use async_trait::async_trait;
use chain_domain::{Address, ObservedInput, ObservedOutput, ObservedTransaction, OutPoint, Script, Transaction, TxHash, TxOut};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct LedgerEntry {
  tx: Transaction,
  height: Option<u64>,
}

pub struct InMemoryLedger {
  transactions: DashMap<TxHash, LedgerEntry>,
  spenders: DashMap<OutPoint, TxHash>,
  by_address: DashMap<Address, Vec<TxHash>>,
  height: AtomicU64,
  auto_mine: AtomicBool,
  dropped_broadcasts: AtomicU32,
  funding_counter: AtomicU32,
  /// Serializa las altas para que la detección de doble gasto sea atómica.
  submit_lock: Mutex<()>,
}

impl Default for InMemoryLedger {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryLedger {
  /// Cadena vacía que mina un bloque por cada transacción aceptada.
  pub fn new() -> Self {
    Self { transactions: DashMap::new(),
           spenders: DashMap::new(),
           by_address: DashMap::new(),
           height: AtomicU64::new(0),
           auto_mine: AtomicBool::new(true),
           dropped_broadcasts: AtomicU32::new(0),
           funding_counter: AtomicU32::new(0),
           submit_lock: Mutex::new(()) }
  }

  pub fn with_auto_mine(self, on: bool) -> Self {
    self.set_auto_mine(on);
    self
  }

  pub fn set_auto_mine(&self, on: bool) {
    self.auto_mine.store(on, Ordering::SeqCst);
  }

  /// Las próximas `n` difusiones se aceptan pero nunca llegan a la cadena.
  pub fn drop_next_broadcasts(&self, n: u32) {
    self.dropped_broadcasts.store(n, Ordering::SeqCst);
  }

  pub fn height(&self) -> u64 {
    self.height.load(Ordering::SeqCst)
  }

  /// Mina un bloque con todas las transacciones pendientes.
  pub fn mine_block(&self) -> u64 {
    let h = self.height.fetch_add(1, Ordering::SeqCst) + 1;
    for mut entry in self.transactions.iter_mut() {
      if entry.height.is_none() {
        entry.height = Some(h);
      }
    }
    h
  }

  pub fn contains(&self, hash: &TxHash) -> bool {
    self.transactions.contains_key(hash)
  }

  pub fn output(&self, outpoint: &OutPoint) -> Option<TxOut> {
    self.transactions
        .get(&outpoint.txid)
        .and_then(|e| e.tx.outputs.get(outpoint.vout as usize).cloned())
  }

  /// Crea una salida financiada de la nada (equivalente a una coinbase).
  pub fn fund(&self, script_pubkey: Script, value: u64) -> (OutPoint, TxOut) {
    let mut tx = Transaction::new();
    tx.lock_time = self.funding_counter.fetch_add(1, Ordering::SeqCst);
    let output = TxOut { value, script_pubkey };
    tx.outputs.push(output.clone());
    let hash = tx.txid();
    self.store(hash, tx);
    (OutPoint { txid: hash, vout: 0 }, output)
  }

  fn store(&self, hash: TxHash, tx: Transaction) {
    for (i, input) in tx.inputs.iter().enumerate() {
      debug!("input {} de {} gasta {}", i, hash, input.previous_output);
      self.spenders.insert(input.previous_output, hash);
    }
    for output in &tx.outputs {
      if let Some(addr) = output.script_pubkey.address() {
        self.by_address.entry(addr).or_default().push(hash);
      }
    }
    self.transactions.insert(hash, LedgerEntry { tx, height: None });
    if self.auto_mine.load(Ordering::SeqCst) {
      self.mine_block();
    }
  }

  /// Valida y registra una transacción.
  pub fn submit(&self, tx: &Transaction) -> BroadcastOutcome {
    let hash = tx.txid();
    let dropped = self.dropped_broadcasts
                      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                      .is_ok();
    if dropped {
      warn!("difusión de {} perdida", hash);
      return BroadcastOutcome::Accepted;
    }
    let _guard = self.submit_lock.lock().unwrap_or_else(|e| e.into_inner());
    if self.contains(&hash) {
      return BroadcastOutcome::Accepted;
    }
    if tx.inputs.is_empty() {
      return BroadcastOutcome::Rejected("transacción sin inputs".to_string());
    }
    let mut input_total = 0u64;
    for (i, input) in tx.inputs.iter().enumerate() {
      let op = input.previous_output;
      let prev = match self.output(&op) {
        Some(o) => o,
        None => return BroadcastOutcome::Rejected(format!("input {} gasta una salida desconocida {}", i, op)),
      };
      if let Some(spender) = self.spenders.get(&op) {
        if *spender != hash {
          return BroadcastOutcome::Rejected(format!("doble gasto de {}", op));
        }
      }
      let check = if prev.script_pubkey.is_p2sh() {
        tx.verify_p2sh_input(i, &prev.script_pubkey)
      } else {
        tx.verify_p2pkh_input(i, &prev.script_pubkey)
      };
      if let Err(e) = check {
        return BroadcastOutcome::Rejected(e.to_string());
      }
      input_total += prev.value;
    }
    if tx.total_output_value() > input_total {
      return BroadcastOutcome::Rejected(format!("salidas ({}) superan a las entradas ({})", tx.total_output_value(), input_total));
    }
    self.store(hash, tx.clone());
    BroadcastOutcome::Accepted
  }

  /// Vista de explorador de una transacción registrada.
  pub fn observe(&self, hash: &TxHash) -> Option<ObservedTransaction> {
    let entry = self.transactions.get(hash)?.clone();
    let height = self.height();
    let inputs = entry.tx
                      .inputs
                      .iter()
                      .map(|input| {
                        let prev = self.output(&input.previous_output);
                        ObservedInput { prev_hash: input.previous_output.txid,
                                        prev_index: input.previous_output.vout,
                                        script: input.script_sig.clone(),
                                        value: prev.as_ref().map(|o| o.value).unwrap_or(0),
                                        addresses: prev.as_ref().and_then(|o| o.script_pubkey.address()).into_iter().collect(),
                                        prev_script: prev.map(|o| o.script_pubkey) }
                      })
                      .collect();
    let outputs = entry.tx
                       .outputs
                       .iter()
                       .enumerate()
                       .map(|(i, o)| ObservedOutput { value: o.value,
                                                      script: o.script_pubkey.clone(),
                                                      addresses: o.script_pubkey.address().into_iter().collect(),
                                                      spent_by: self.spenders.get(&OutPoint { txid: *hash, vout: i as u32 }).map(|s| *s) })
                       .collect();
    Some(ObservedTransaction { hash: *hash,
                               confirmations: entry.height.map(|h| (height - h + 1) as u32).unwrap_or(0),
                               block_height: entry.height,
                               inputs,
                               outputs })
  }
}

#[async_trait]
impl Explorer for InMemoryLedger {
  async fn transaction(&self, hash: &TxHash) -> Result<Option<ObservedTransaction>> {
    Ok(self.observe(hash))
  }

  async fn tx_hashes_of_address(&self, address: &Address) -> Result<Vec<TxHash>> {
    Ok(self.by_address.get(address).map(|v| v.clone()).unwrap_or_default())
  }

  async fn spender_of_outpoint(&self, outpoint: &OutPoint) -> Result<Option<ObservedTransaction>> {
    let spender = self.spenders.get(outpoint).map(|s| *s);
    Ok(spender.and_then(|h| self.observe(&h)))
  }
}
