// Archivo: stubs.rs
// Propósito: implementación en memoria del almacén de grafos para pruebas y
// wiring rápido. No es durable.
use crate::errors::{FlowError, Result};
use crate::repository::{GraphRepository, GraphSnapshot};
use std::sync::{Mutex, MutexGuard};

/// Almacén en memoria: guarda la última instantánea y cuenta escrituras.
pub struct InMemoryGraphRepository {
  snapshot: Mutex<GraphSnapshot>,
  /// Número de veces que se llamó a `save`.
  saves: Mutex<usize>,
}

impl InMemoryGraphRepository {
  /// Crea un repositorio vacío.
  pub fn new() -> Self {
    Self { snapshot: Mutex::new(GraphSnapshot::default()), saves: Mutex::new(0) }
  }

  /// Helper para mapear `Mutex::lock()` en un `Result` con
  /// `FlowError::Storage`.
  fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> std::result::Result<MutexGuard<'a, T>, FlowError> {
    m.lock().map_err(|e| FlowError::Storage(format!("mutex poisoned: {:?}", e)))
  }

  pub fn save_count(&self) -> usize {
    *self.saves.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Default for InMemoryGraphRepository {
  fn default() -> Self {
    Self::new()
  }
}

impl GraphRepository for InMemoryGraphRepository {
  fn load(&self) -> Result<GraphSnapshot> {
    Ok(self.lock(&self.snapshot)?.clone())
  }

  fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
    *self.lock(&self.snapshot)? = snapshot.clone();
    *self.lock(&self.saves)? += 1;
    Ok(())
  }
}
