// Archivo: wallet.rs
// Propósito: billetera en memoria sobre `InMemoryLedger`. Las claves se
// derivan de una semilla y un contador, de modo que persistir el contador
// y las monedas basta para restaurar la billetera.
use crate::errors::{ProviderError, Result};
use crate::ledger::InMemoryLedger;
use crate::traits::{BroadcastOutcome, ChainConnection};
use async_trait::async_trait;
use chain_domain::script::{p2pkh_output_script, p2pkh_unlock_script, SIGHASH_ALL};
use chain_domain::{Address, DomainError, KeyPair, LocalTransaction, OutPoint, PublicKey, Transaction, TransactionSigner, TxIn, TxOut,
                   DEFAULT_FEE_PER_KB};
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// Tamaños aproximados de un input P2PKH firmado y de una salida de cambio.
const P2PKH_INPUT_SIZE: usize = 148;
const CHANGE_OUTPUT_SIZE: usize = 34;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Coin {
  outpoint: OutPoint,
  output: TxOut,
  key: PublicKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletState {
  name: String,
  key_count: u32,
  coins: Vec<Coin>,
}

pub struct InMemoryWallet {
  name: String,
  seed: Vec<u8>,
  ledger: Arc<InMemoryLedger>,
  keys: DashMap<PublicKey, KeyPair>,
  key_count: AtomicU32,
  coins: Mutex<Vec<Coin>>,
  fee_per_kb: u64,
  state_path: Option<PathBuf>,
}

impl InMemoryWallet {
  pub fn new(name: impl Into<String>, seed: &[u8], ledger: Arc<InMemoryLedger>) -> Self {
    Self { name: name.into(),
           seed: seed.to_vec(),
           ledger,
           keys: DashMap::new(),
           key_count: AtomicU32::new(0),
           coins: Mutex::new(Vec::new()),
           fee_per_kb: DEFAULT_FEE_PER_KB,
           state_path: None }
  }

  /// Construye la billetera desde variables de entorno:
  /// `CHAINFLOW_WALLET_SEED` (por defecto el nombre) y
  /// `CHAINFLOW_WALLET_FILE` (opcional, se restaura si existe).
  pub fn from_env(name: &str, ledger: Arc<InMemoryLedger>) -> Result<Self> {
    dotenvy::dotenv().ok();
    let seed = std::env::var("CHAINFLOW_WALLET_SEED").unwrap_or_else(|_| name.to_string());
    let mut wallet = Self::new(name, seed.as_bytes(), ledger);
    if let Ok(path) = std::env::var("CHAINFLOW_WALLET_FILE") {
      wallet = wallet.with_state_file(path);
      wallet.restore()?;
    }
    Ok(wallet)
  }

  pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.state_path = Some(path.into());
    self
  }

  pub fn with_fee_per_kb(mut self, fee_per_kb: u64) -> Self {
    self.fee_per_kb = fee_per_kb;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  fn lock_coins(&self) -> MutexGuard<'_, Vec<Coin>> {
    self.coins.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn key_at(&self, index: u32) -> Result<KeyPair> {
    let mut material = self.seed.clone();
    material.extend_from_slice(b"/");
    material.extend_from_slice(&index.to_be_bytes());
    Ok(KeyPair::from_seed(&material)?)
  }

  fn derive_key(&self) -> Result<PublicKey> {
    let index = self.key_count.fetch_add(1, Ordering::SeqCst);
    let kp = self.key_at(index)?;
    let public = kp.public_key().clone();
    self.keys.insert(public.clone(), kp);
    Ok(public)
  }

  fn key_for_pubkey_hash(&self, pkh: &[u8]) -> Option<PublicKey> {
    self.keys
        .iter()
        .find(|e| e.key().pubkey_hash().as_slice() == pkh)
        .map(|e| e.key().clone())
  }

  /// Recibe fondos nuevos del ledger en una dirección propia.
  pub fn fund(&self, value: u64) -> Result<OutPoint> {
    let key = self.derive_key()?;
    let (outpoint, output) = self.ledger.fund(p2pkh_output_script(&key.pubkey_hash()), value);
    self.lock_coins().push(Coin { outpoint, output, key });
    Ok(outpoint)
  }

  /// Incorpora las salidas P2PKH que pagan a claves propias.
  fn absorb_outputs(&self, tx: &Transaction) {
    let hash = tx.txid();
    let mut coins = self.lock_coins();
    for (i, out) in tx.outputs.iter().enumerate() {
      if !out.script_pubkey.is_p2pkh() {
        continue;
      }
      let outpoint = OutPoint { txid: hash, vout: i as u32 };
      if coins.iter().any(|c| c.outpoint == outpoint) {
        continue;
      }
      if let Some(key) = self.key_for_pubkey_hash(&out.script_pubkey.as_bytes()[3..23]) {
        debug!("{}: nueva moneda {} de {} sat", self.name, outpoint, out.value);
        coins.push(Coin { outpoint, output: out.clone(), key });
      }
    }
  }

  fn complete_start(&self, mut tx: Transaction) -> Result<LocalTransaction> {
    let needed = tx.total_output_value();
    let mut coins = self.lock_coins();
    let mut selected: Vec<Coin> = Vec::new();
    let mut total = 0u64;
    let mut fee = 0u64;
    for coin in coins.iter() {
      selected.push(coin.clone());
      total += coin.output.value;
      let size = tx.serialize().len() + selected.len() * P2PKH_INPUT_SIZE + CHANGE_OUTPUT_SIZE;
      fee = self.fee_per_kb * size as u64 / 1000;
      if total >= needed + fee {
        break;
      }
    }
    if total < needed + fee {
      return Err(ProviderError::Wallet(format!("saldo insuficiente: {} < {}", total, needed + fee)));
    }
    tx.inputs = selected.iter().map(|c| TxIn::new(c.outpoint)).collect();
    let change = total - needed - fee;
    if change > 0 {
      let change_key = self.derive_key()?;
      tx.outputs.push(TxOut { value: change, script_pubkey: p2pkh_output_script(&change_key.pubkey_hash()) });
    }
    for (i, coin) in selected.iter().enumerate() {
      let digest = tx.signature_hash(i, &coin.output.script_pubkey)?;
      let mut sig = self.sign_digest(&coin.key, &digest)?;
      sig.push(SIGHASH_ALL);
      tx.inputs[i].script_sig = p2pkh_unlock_script(&sig, &coin.key);
    }
    coins.retain(|c| !selected.iter().any(|s| s.outpoint == c.outpoint));
    let connected = selected.into_iter().map(|c| Some(c.output)).collect();
    Ok(LocalTransaction::new(tx, connected))
  }

  /// Restaura claves y monedas desde el fichero de estado, si existe.
  pub fn restore(&self) -> Result<()> {
    let path = match &self.state_path {
      Some(p) if p.exists() => p,
      _ => return Ok(()),
    };
    let state: WalletState = serde_json::from_slice(&std::fs::read(path)?)?;
    for index in 0..state.key_count {
      let kp = self.key_at(index)?;
      self.keys.insert(kp.public_key().clone(), kp);
    }
    self.key_count.store(state.key_count, Ordering::SeqCst);
    *self.lock_coins() = state.coins;
    info!("billetera {} restaurada desde {}", self.name, path.display());
    Ok(())
  }

  fn snapshot(&self) -> WalletState {
    WalletState { name: self.name.clone(), key_count: self.key_count.load(Ordering::SeqCst), coins: self.lock_coins().clone() }
  }
}

impl TransactionSigner for InMemoryWallet {
  fn sign_digest(&self, key: &PublicKey, digest: &[u8; 32]) -> std::result::Result<Vec<u8>, DomainError> {
    let kp = self.keys
                 .get(key)
                 .ok_or_else(|| DomainError::ValidationError(format!("La billetera {} no tiene la clave {}", self.name, key)))?;
    kp.sign_digest(digest)
  }
}

#[async_trait]
impl ChainConnection for InMemoryWallet {
  async fn balance(&self) -> Result<u64> {
    Ok(self.lock_coins().iter().map(|c| c.output.value).sum())
  }

  async fn fresh_key(&self) -> Result<PublicKey> {
    self.derive_key()
  }

  async fn fresh_receive_address(&self) -> Result<Address> {
    Ok(Address::PubKeyHash(self.derive_key()?.pubkey_hash()))
  }

  async fn complete_start_transaction(&self, tx: Transaction) -> Result<LocalTransaction> {
    self.complete_start(tx)
  }

  async fn broadcast(&self, tx: &Transaction, wait_max: Duration) -> Result<BroadcastOutcome> {
    debug!("{}: difundiendo {} (espera máxima {:?})", self.name, tx.txid(), wait_max);
    let outcome = self.ledger.submit(tx);
    if outcome.is_accepted() {
      self.absorb_outputs(tx);
    }
    Ok(outcome)
  }

  async fn persist(&self) -> Result<()> {
    if let Some(path) = &self.state_path {
      let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
      std::fs::write(path, bytes)?;
    }
    Ok(())
  }
}
