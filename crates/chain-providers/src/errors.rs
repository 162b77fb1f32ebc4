// errors.rs
use chain_domain::DomainError;
use thiserror::Error;

/// Errores de los colaboradores externos: billetera, red y explorador.
#[derive(Debug, Error)]
pub enum ProviderError {
  /// La red rechazó la transacción (doble gasto, firma inválida...).
  #[error("Transacción rechazada: {0}")]
  Rejected(String),
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Fondos insuficientes o clave desconocida.
  #[error("Error de billetera: {0}")]
  Wallet(String),
  #[error("Error de conexión: {0}")]
  Connection(String),
  #[error("Error de dominio: {0}")]
  Domain(#[from] DomainError),
  #[error("Error de serialización: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Error de E/S: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
