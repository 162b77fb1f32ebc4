// Archivo: traits.rs
// Propósito: contratos de los colaboradores externos del gestor de
// workflows. La conexión con la cadena maneja claves, fondos y difusión; el
// explorador expone la vista pública de la cadena.
use crate::errors::Result;
use async_trait::async_trait;
use chain_domain::{Address, LocalTransaction, ObservedTransaction, OutPoint, PublicKey, Transaction, TransactionSigner, TxHash};
use std::time::Duration;

/// Resultado de difundir una transacción.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
  Accepted,
  Rejected(String),
}

impl BroadcastOutcome {
  pub fn is_accepted(&self) -> bool {
    matches!(self, BroadcastOutcome::Accepted)
  }
}

/// Billetera + red. Firma a través de `TransactionSigner` sin exponer las
/// claves privadas.
#[async_trait]
pub trait ChainConnection: TransactionSigner + Send + Sync {
  /// Saldo gastable de la billetera, en satoshis.
  async fn balance(&self) -> Result<u64>;

  /// Genera (y recuerda) una clave nueva.
  async fn fresh_key(&self) -> Result<PublicKey>;

  /// Dirección P2PKH nueva para recibir fondos.
  async fn fresh_receive_address(&self) -> Result<Address>;

  /// Añade inputs de la billetera, cambio y firmas a una transacción START.
  async fn complete_start_transaction(&self, tx: Transaction) -> Result<LocalTransaction>;

  /// Difunde la transacción esperando como mucho `wait_max` la respuesta
  /// de la red.
  async fn broadcast(&self, tx: &Transaction, wait_max: Duration) -> Result<BroadcastOutcome>;

  /// Persiste el estado de la billetera.
  async fn persist(&self) -> Result<()>;
}

/// Vista pública de la cadena (explorador de bloques).
#[async_trait]
pub trait Explorer: Send + Sync {
  async fn transaction(&self, hash: &TxHash) -> Result<Option<ObservedTransaction>>;

  /// Hashes de transacciones que pagan a `address`, en orden de llegada.
  async fn tx_hashes_of_address(&self, address: &Address) -> Result<Vec<TxHash>>;

  /// Transacción publicada que gasta `outpoint`, si existe.
  async fn spender_of_outpoint(&self, outpoint: &OutPoint) -> Result<Option<ObservedTransaction>>;
}
