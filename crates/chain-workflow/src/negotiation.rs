// Archivo: negotiation.rs
// Propósito: cerrojo de negociación. Un participante negocia como mucho un
// traspaso a la vez; el cerrojo se mantiene entre las rondas del protocolo
// (plantilla, confirmación, publicación) y se libera al soltar la guarda.
use crate::errors::{Result, WorkflowError};
use log::debug;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Cerrojo FIFO: quien espera primero lo obtiene primero.
#[derive(Debug)]
pub struct NegotiationLock {
  id: Uuid,
  inner: Arc<Mutex<()>>,
}

/// Prueba de que se tiene el cerrojo de un gestor concreto.
#[derive(Debug)]
pub struct NegotiationGuard {
  lock_id: Uuid,
  _permit: OwnedMutexGuard<()>,
}

impl NegotiationGuard {
  pub fn lock_id(&self) -> Uuid {
    self.lock_id
  }
}

impl Drop for NegotiationGuard {
  fn drop(&mut self) {
    debug!("cerrojo de negociación {} liberado", self.lock_id);
  }
}

impl Default for NegotiationLock {
  fn default() -> Self {
    Self::new()
  }
}

impl NegotiationLock {
  pub fn new() -> Self {
    Self { id: Uuid::new_v4(), inner: Arc::new(Mutex::new(())) }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  /// Espera hasta obtener el cerrojo.
  pub async fn acquire(&self) -> NegotiationGuard {
    debug!("esperando el cerrojo de negociación {}", self.id);
    let permit = self.inner.clone().lock_owned().await;
    debug!("cerrojo de negociación {} adquirido", self.id);
    NegotiationGuard { lock_id: self.id, _permit: permit }
  }

  /// Devuelve `None` de inmediato si otro lo tiene.
  pub fn try_acquire(&self) -> Option<NegotiationGuard> {
    self.inner
        .clone()
        .try_lock_owned()
        .ok()
        .map(|permit| NegotiationGuard { lock_id: self.id, _permit: permit })
  }

  pub fn is_locked(&self) -> bool {
    self.inner.try_lock().is_err()
  }

  /// Falla con `LockNotHeld` si la guarda es de otro cerrojo.
  pub fn check(&self, guard: &NegotiationGuard) -> Result<()> {
    if guard.lock_id != self.id {
      return Err(WorkflowError::LockNotHeld);
    }
    Ok(())
  }

  /// Libera la guarda si existe.
  pub fn conditionally_release(guard: Option<NegotiationGuard>) {
    if let Some(guard) = guard {
      drop(guard);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn try_acquire_fails_while_held() {
    let lock = NegotiationLock::new();
    let guard = lock.acquire().await;
    assert!(lock.is_locked());
    assert!(lock.try_acquire().is_none());
    NegotiationLock::conditionally_release(Some(guard));
    assert!(!lock.is_locked());
    assert!(lock.try_acquire().is_some());
  }

  #[tokio::test]
  async fn guard_of_another_lock_is_rejected() {
    let mine = NegotiationLock::new();
    let other = NegotiationLock::new();
    let foreign = other.acquire().await;
    assert!(matches!(mine.check(&foreign), Err(WorkflowError::LockNotHeld)));
    let own = mine.acquire().await;
    assert!(mine.check(&own).is_ok());
  }
}
