use chain_domain::DomainError;
use chain_providers::ProviderError;
use flow::errors::FlowError;
use thiserror::Error;

// Errores del gestor de traspasos.
//
// Agrupa los errores de las capas inferiores (dominio, grafo, proveedores)
// y las violaciones propias del protocolo: propiedad de pasos, estado del
// workflow, cerrojo de negociación, confirmaciones y reconciliación.
#[derive(Error, Debug)]
pub enum WorkflowError {
  /// Errores del núcleo del protocolo (codec, scripts, firmas).
  #[error("Error de dominio: {0}")]
  Domain(#[from] DomainError),

  /// Errores del grafo de ejecución o de su persistencia.
  #[error("Error de flujo: {0}")]
  Flow(#[from] FlowError),

  /// Errores de la billetera, la red o el explorador.
  #[error("Error de proveedor: {0}")]
  Provider(#[from] ProviderError),

  #[error("Error de serializacion: {0}")]
  Serialization(#[from] serde_json::Error),

  /// El paso no pertenece a la identidad que pretende usarlo.
  #[error("Violación de propiedad: {0}")]
  OwnershipViolation(String),

  /// El workflow no está en el estado que la operación necesita
  /// (inexistente, terminado, paso que no es hoja, plantilla...).
  #[error("Estado de workflow inválido: {0}")]
  WorkflowStateViolation(String),

  /// La operación de negociación se llamó sin el cerrojo del gestor.
  #[error("El cerrojo de negociación no está en manos del llamador")]
  LockNotHeld,

  /// La transacción no alcanzó la profundidad pedida a tiempo.
  #[error("Tiempo de confirmación agotado: {0}")]
  ConfirmationTimeout(String),

  /// La vista de la cadena contradice el grafo local.
  #[error("Inconsistencia de reconciliación: {0}")]
  ReconciliationInconsistency(String),

  /// Argumentos inválidos o datos recibidos que no son los acordados.
  #[error("Error de validacion: {0}")]
  Validation(String),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
