// Archivo: config.rs
// Propósito: parámetros de publicación y confirmación del gestor. Los
// valores por defecto reproducen los de una red real; las pruebas los
// acortan.
use crate::errors::{Result, WorkflowError};
use chain_domain::DEFAULT_FEE_PER_KB;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
  /// Difusiones como máximo antes de dar la publicación por fallida.
  pub max_broadcast_tries: u32,
  /// Profundidad a partir de la cual un paso se considera confirmado.
  pub depth_until_confirmed: u32,
  pub wait_max_for_confirmation: Duration,
  /// Espera máxima por la respuesta de la red a una difusión.
  pub wait_max_for_broadcast: Duration,
  pub confirmation_poll_interval: Duration,
  /// Pausa tras difundir antes de volver a preguntar al explorador.
  pub broadcast_settle: Duration,
  /// Rondas de publicar + esperar en la publicación agresiva.
  pub aggressive_rounds: u32,
  pub fee_per_kb: u64,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    ManagerConfig { max_broadcast_tries: 10,
                    depth_until_confirmed: 1,
                    wait_max_for_confirmation: Duration::from_secs(90 * 60),
                    wait_max_for_broadcast: Duration::from_secs(30),
                    confirmation_poll_interval: Duration::from_secs(3),
                    broadcast_settle: Duration::from_millis(800),
                    aggressive_rounds: 3,
                    fee_per_kb: DEFAULT_FEE_PER_KB }
  }
}

impl ManagerConfig {
  /// Parte de los valores por defecto y aplica las variables
  /// `CHAINFLOW_*` presentes (tras cargar `.env` si existe):
  ///
  /// - `CHAINFLOW_MAX_BROADCAST_TRIES`
  /// - `CHAINFLOW_DEPTH_UNTIL_CONFIRMED`
  /// - `CHAINFLOW_CONFIRMATION_WAIT_SECS`
  /// - `CHAINFLOW_BROADCAST_WAIT_SECS`
  /// - `CHAINFLOW_POLL_INTERVAL_MS`
  /// - `CHAINFLOW_BROADCAST_SETTLE_MS`
  /// - `CHAINFLOW_AGGRESSIVE_ROUNDS`
  /// - `CHAINFLOW_FEE_PER_KB`
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let mut config = Self::default();
    if let Some(v) = env_value("CHAINFLOW_MAX_BROADCAST_TRIES")? {
      config.max_broadcast_tries = v;
    }
    if let Some(v) = env_value("CHAINFLOW_DEPTH_UNTIL_CONFIRMED")? {
      config.depth_until_confirmed = v;
    }
    if let Some(v) = env_value("CHAINFLOW_CONFIRMATION_WAIT_SECS")? {
      config.wait_max_for_confirmation = Duration::from_secs(v);
    }
    if let Some(v) = env_value("CHAINFLOW_BROADCAST_WAIT_SECS")? {
      config.wait_max_for_broadcast = Duration::from_secs(v);
    }
    if let Some(v) = env_value("CHAINFLOW_POLL_INTERVAL_MS")? {
      config.confirmation_poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = env_value("CHAINFLOW_BROADCAST_SETTLE_MS")? {
      config.broadcast_settle = Duration::from_millis(v);
    }
    if let Some(v) = env_value("CHAINFLOW_AGGRESSIVE_ROUNDS")? {
      config.aggressive_rounds = v;
    }
    if let Some(v) = env_value("CHAINFLOW_FEE_PER_KB")? {
      config.fee_per_kb = v;
    }
    Ok(config)
  }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>> {
  match std::env::var(name) {
    Ok(raw) => raw.trim()
                  .parse::<T>()
                  .map(Some)
                  .map_err(|_| WorkflowError::Validation(format!("{} no es un valor válido: {}", name, raw))),
    Err(_) => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_network_timings() {
    let c = ManagerConfig::default();
    assert_eq!(c.max_broadcast_tries, 10);
    assert_eq!(c.wait_max_for_confirmation, Duration::from_secs(5400));
    assert_eq!(c.broadcast_settle, Duration::from_millis(800));
    assert_eq!(c.aggressive_rounds, 3);
  }

  #[test]
  fn env_overrides_and_rejects_garbage() {
    std::env::set_var("CHAINFLOW_AGGRESSIVE_ROUNDS", "5");
    assert_eq!(ManagerConfig::from_env().unwrap().aggressive_rounds, 5);
    std::env::set_var("CHAINFLOW_AGGRESSIVE_ROUNDS", "cinco");
    assert!(matches!(ManagerConfig::from_env(), Err(WorkflowError::Validation(_))));
    std::env::remove_var("CHAINFLOW_AGGRESSIVE_ROUNDS");
  }
}
