// Archivo: publisher.rs
// Propósito: publicar transacciones de pasos y esperar su confirmación.
// Todos los bucles están acotados: la difusión por número de intentos y la
// espera de confirmación por tiempo.
use crate::config::ManagerConfig;
use crate::errors::{Result, WorkflowError};
use chain_domain::{HandoverData, Transaction, TxHash};
use chain_providers::{BroadcastOutcome, ChainConnection, Explorer};
use log::{debug, warn};
use std::sync::Arc;
use tokio::time::{sleep, Instant};

pub struct Publisher {
  chain: Arc<dyn ChainConnection>,
  explorer: Arc<dyn Explorer>,
  config: ManagerConfig,
}

impl Publisher {
  pub fn new(chain: Arc<dyn ChainConnection>, explorer: Arc<dyn Explorer>, config: ManagerConfig) -> Self {
    Self { chain, explorer, config }
  }

  /// `true` si el explorador ya conoce la transacción. Un fallo del
  /// explorador cuenta como "no visible".
  pub async fn is_online(&self, hash: &TxHash) -> bool {
    match self.explorer.transaction(hash).await {
      Ok(found) => found.is_some(),
      Err(e) => {
        debug!("el explorador no pudo consultar {}: {}", hash, e);
        false
      }
    }
  }

  /// Difunde hasta que el explorador vea la transacción. Con `check_first`
  /// no se difunde lo que ya está publicado.
  pub async fn publish(&self, handover: &HandoverData, check_first: bool) -> Result<()> {
    let tx = local_transaction(handover)?;
    let hash = tx.txid();
    let mut online = check_first && self.is_online(&hash).await;
    let mut tries = 0u32;
    while !online {
      if tries >= self.config.max_broadcast_tries {
        return Err(WorkflowError::ConfirmationTimeout(format!("{} no apareció tras {} difusiones", hash, tries)));
      }
      if tries > 0 {
        warn!("reintentando la difusión de {} (intento {})", hash, tries + 1);
      }
      match self.chain.broadcast(&tx, self.config.wait_max_for_broadcast).await? {
        BroadcastOutcome::Accepted => debug!("{} aceptada por la red", hash),
        BroadcastOutcome::Rejected(reason) => {
          warn!("la red rechazó {}: {}", hash, reason);
          return Err(chain_providers::ProviderError::Rejected(reason).into());
        }
      }
      self.chain.persist().await?;
      sleep(self.config.broadcast_settle).await;
      online = self.is_online(&hash).await;
      tries += 1;
    }
    debug!("{} publicada", hash);
    Ok(())
  }

  /// Espera a que la transacción alcance `depth` confirmaciones. Devuelve
  /// `false` si se agota `wait_max_for_confirmation`.
  pub async fn wait_for_confirmation_depth(&self, hash: &TxHash, depth: u32) -> Result<bool> {
    let deadline = Instant::now() + self.config.wait_max_for_confirmation;
    loop {
      let confirmations = self.explorer
                              .transaction(hash)
                              .await?
                              .map(|o| o.confirmations)
                              .unwrap_or(0);
      if confirmations >= depth {
        debug!("{} con {} confirmaciones", hash, confirmations);
        return Ok(true);
      }
      if Instant::now() >= deadline {
        return Ok(false);
      }
      sleep(self.config.confirmation_poll_interval).await;
    }
  }

  /// Rondas de publicar y esperar la profundidad configurada.
  pub async fn publish_aggressively(&self, handover: &HandoverData) -> Result<bool> {
    let tx = local_transaction(handover)?;
    let hash = tx.txid();
    for round in 1..=self.config.aggressive_rounds {
      debug!("publicación agresiva de {}: ronda {}", hash, round);
      self.publish(handover, true).await?;
      if self.wait_for_confirmation_depth(&hash, self.config.depth_until_confirmed).await? {
        return Ok(true);
      }
      warn!("{} sin confirmar tras la ronda {}", hash, round);
    }
    Ok(false)
  }
}

fn local_transaction(handover: &HandoverData) -> Result<Transaction> {
  handover.reference()
          .and_then(|r| r.local_transaction())
          .map(|l| l.transaction.clone())
          .ok_or_else(|| WorkflowError::WorkflowStateViolation("el paso no tiene una transacción local".to_string()))
}
