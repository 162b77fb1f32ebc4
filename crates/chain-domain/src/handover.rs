// handover.rs
use crate::keys::PublicKey;
use crate::reference::TransactionReference;
use crate::workflow::WorkflowHandoverData;
use crate::DomainError;
use serde::{Deserialize, Serialize};

/// Datos de un paso: metadatos, transacción (si existe), claves y
/// compromisos necesarios para gastar cada salida con token.
///
/// `template = true` indica que la transacción aún no se puede publicar.
/// `sender = true` marca los pasos que inició este participante.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverData {
  workflow_data: WorkflowHandoverData,
  reference: Option<TransactionReference>,
  keys: Vec<PublicKey>,
  commitments: Vec<Vec<Vec<u8>>>,
  sender: bool,
  template: bool,
}

impl HandoverData {
  /// Las listas por salida, si no están vacías, deben tener una entrada por
  /// salida con token. Sin referencia no hay nada contra qué comprobarlas.
  pub fn new(workflow_data: WorkflowHandoverData,
             reference: Option<TransactionReference>,
             keys: Vec<PublicKey>,
             commitments: Vec<Vec<Vec<u8>>>,
             sender: bool,
             template: bool)
             -> Result<Self, DomainError> {
    if let Some(r) = &reference {
      let n = r.token_output_indices().len();
      if !keys.is_empty() && keys.len() != n {
        return Err(DomainError::ValidationError(format!("{} claves para {} salidas con token", keys.len(), n)));
      }
      if !commitments.is_empty() && commitments.len() != n {
        return Err(DomainError::ValidationError(format!("{} listas de compromisos para {} salidas con token",
                                                        commitments.len(),
                                                        n)));
      }
    }
    Ok(Self { workflow_data, reference, keys, commitments, sender, template })
  }

  pub fn workflow_data(&self) -> &WorkflowHandoverData {
    &self.workflow_data
  }

  pub fn workflow_data_mut(&mut self) -> &mut WorkflowHandoverData {
    &mut self.workflow_data
  }

  pub fn reference(&self) -> Option<&TransactionReference> {
    self.reference.as_ref()
  }

  pub fn reference_mut(&mut self) -> Option<&mut TransactionReference> {
    self.reference.as_mut()
  }

  pub fn keys(&self) -> &[PublicKey] {
    &self.keys
  }

  pub fn commitments(&self) -> &[Vec<Vec<u8>>] {
    &self.commitments
  }

  pub fn set_commitments(&mut self, commitments: Vec<Vec<Vec<u8>>>) {
    self.commitments = commitments;
  }

  pub fn is_sender(&self) -> bool {
    self.sender
  }

  pub fn is_template(&self) -> bool {
    self.template
  }

  /// `true` si la transacción fue construida por nosotros (no sólo observada).
  pub fn contains_local_transaction(&self) -> bool {
    self.reference.as_ref().map(|r| r.is_local()).unwrap_or(false)
  }

  fn token_position(&self, output_index: u32) -> Option<usize> {
    match &self.reference {
      Some(r) => r.token_output_indices().iter().position(|i| *i == output_index),
      None => (output_index == 0).then_some(0),
    }
  }

  /// Clave que desbloquea la salida `output_index`.
  pub fn key_for_output(&self, output_index: u32) -> Result<&PublicKey, DomainError> {
    self.token_position(output_index)
        .and_then(|p| self.keys.get(p))
        .ok_or_else(|| DomainError::ValidationError(format!("Sin clave para la salida {}", output_index)))
  }

  /// Compromisos del redeem script de la salida `output_index` (vacío si no hay).
  pub fn commitments_for_output(&self, output_index: u32) -> Vec<Vec<u8>> {
    self.token_position(output_index)
        .and_then(|p| self.commitments.get(p))
        .cloned()
        .unwrap_or_default()
  }

  pub fn clone_with_reference(&self, reference: TransactionReference, template: bool) -> Result<Self, DomainError> {
    Self::new(self.workflow_data.clone(),
              Some(reference),
              self.keys.clone(),
              self.commitments.clone(),
              self.sender,
              template)
  }
}
