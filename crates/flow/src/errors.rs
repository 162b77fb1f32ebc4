// Archivo: errors.rs
// Propósito: errores del grafo de ejecución y alias Result<T>.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
  /// Paso, raíz o instancia inexistente.
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Id de paso repetido o eliminación que rompería el DAG.
  #[error("Conflicto en el grafo: {0}")]
  Conflict(String),
  /// Fallo del almacén (base de datos, pool, mutex envenenado).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  #[error("Serialización del grafo: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
