// errors.rs
use thiserror::Error;

/// Errores del núcleo del protocolo (codec, scripts, estructura de
/// transacciones y firmas off-chain).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
  /// El bloque de datos embebido no respeta el formato de 80 bytes.
  #[error("Payload malformado: {0}")]
  MalformedPayload(String),
  /// La transacción no coincide con ninguna de las formas conocidas.
  #[error("Estructura no reconocida: {0}")]
  UnrecognizedStructure(String),
  /// La firma off-chain (o la firma de un input) no valida.
  #[error("Firma inválida: {0}")]
  SignatureMismatch(String),
  #[error("Error de validación: {0}")]
  ValidationError(String),
  /// Fallo de consistencia interna: el builder produjo algo que el
  /// clasificador no reconoce.
  #[error("Error interno: {0}")]
  Internal(String),
  #[error("Error de serialización: {0}")]
  SerializationError(String),
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::SerializationError(e.to_string())
  }
}

impl From<hex::FromHexError> for DomainError {
  fn from(e: hex::FromHexError) -> Self {
    Self::SerializationError(e.to_string())
  }
}
