// Archivo: ids.rs
// Propósito: asignador de ids de pasos. Los ids son únicos dentro del
// almacén de un participante, no globalmente.
use crate::domain::StepId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
  last: StepId,
}

impl IdAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Continúa a partir de `last` (el próximo id será `last + 1`).
  pub fn starting_after(last: StepId) -> Self {
    Self { last }
  }

  /// Pre-incrementa y devuelve el nuevo id.
  pub fn next_id(&mut self) -> StepId {
    self.last += 1;
    self.last
  }

  /// Último id entregado.
  pub fn peek(&self) -> StepId {
    self.last
  }

  /// Garantiza que ningún id futuro colisione con `id`.
  pub fn advance_past(&mut self, id: StepId) {
    if id > self.last {
      self.last = id;
    }
  }
}
