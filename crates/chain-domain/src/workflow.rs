// workflow.rs
use crate::hashing::hash160;
use crate::DomainError;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identificador de 16 bits de una instancia de workflow en ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowInstance(pub u16);

impl WorkflowInstance {
  pub fn id(&self) -> u16 {
    self.0
  }
}

impl fmt::Display for WorkflowInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "WF#{}", self.0)
  }
}

/// Tipo de transición documentada en la cadena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HandoverKind {
  Start,
  Intermediate,
  End,
  Split,
  Join,
}

impl fmt::Display for HandoverKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      HandoverKind::Start => "START",
      HandoverKind::Intermediate => "INTERMEDIATE",
      HandoverKind::End => "END",
      HandoverKind::Split => "SPLIT",
      HandoverKind::Join => "JOIN",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for HandoverKind {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "START" => Ok(HandoverKind::Start),
      "INTERMEDIATE" => Ok(HandoverKind::Intermediate),
      "END" => Ok(HandoverKind::End),
      "SPLIT" => Ok(HandoverKind::Split),
      "JOIN" => Ok(HandoverKind::Join),
      other => Err(DomainError::ValidationError(format!("Tipo de handover desconocido: {}", other))),
    }
  }
}

/// Metadatos de una transición: instancia, tarea siguiente, tipo y marca de
/// tiempo, más el payload opaco opcional y su hash160.
///
/// La igualdad ignora el payload: una de las partes puede tenerlo cifrado y
/// sólo el hash es vinculante.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHandoverData {
  instance: WorkflowInstance,
  task_id: u8,
  kind: HandoverKind,
  timestamp: u32,
  #[serde(default)]
  workflow_data: Option<Vec<u8>>,
  #[serde(default)]
  data_hash: Option<[u8; 20]>,
}

impl WorkflowHandoverData {
  /// Crea los metadatos; `task_id` sólo se conserva para INTERMEDIATE.
  pub fn new(instance: WorkflowInstance, task_id: u8, kind: HandoverKind, timestamp: u32) -> Self {
    let task_id = if kind == HandoverKind::Intermediate { task_id } else { 0 };
    Self { instance, task_id, kind, timestamp, workflow_data: None, data_hash: None }
  }

  pub fn start(instance: WorkflowInstance, timestamp: u32) -> Self {
    Self::new(instance, 0, HandoverKind::Start, timestamp)
  }

  pub fn intermediate(instance: WorkflowInstance, task_id: u8, timestamp: u32) -> Self {
    Self::new(instance, task_id, HandoverKind::Intermediate, timestamp)
  }

  pub fn split(instance: WorkflowInstance, timestamp: u32) -> Self {
    Self::new(instance, 0, HandoverKind::Split, timestamp)
  }

  pub fn join(instance: WorkflowInstance, timestamp: u32) -> Self {
    Self::new(instance, 0, HandoverKind::Join, timestamp)
  }

  pub fn end(instance: WorkflowInstance, timestamp: u32) -> Self {
    Self::new(instance, 0, HandoverKind::End, timestamp)
  }

  /// Fija el payload y recalcula su hash160.
  pub fn set_workflow_data(&mut self, data: Vec<u8>) {
    self.data_hash = Some(hash160(&data));
    self.workflow_data = Some(data);
  }

  pub fn with_workflow_data(mut self, data: Option<Vec<u8>>) -> Self {
    if let Some(d) = data {
      self.set_workflow_data(d);
    }
    self
  }

  pub fn instance(&self) -> WorkflowInstance {
    self.instance
  }

  pub fn task_id(&self) -> u8 {
    self.task_id
  }

  pub fn kind(&self) -> HandoverKind {
    self.kind
  }

  pub fn timestamp(&self) -> u32 {
    self.timestamp
  }

  pub fn workflow_data(&self) -> Option<&[u8]> {
    self.workflow_data.as_deref()
  }

  pub fn data_hash(&self) -> Option<&[u8; 20]> {
    self.data_hash.as_ref()
  }

  /// Lista de compromisos que se incrustan en el redeem script de salida.
  pub fn commitments(&self) -> Vec<Vec<u8>> {
    self.data_hash.iter().map(|h| h.to_vec()).collect()
  }

  pub fn timestamp_pretty(&self) -> String {
    match Utc.timestamp_opt(i64::from(self.timestamp), 0).single() {
      Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
      None => self.timestamp.to_string(),
    }
  }
}

impl PartialEq for WorkflowHandoverData {
  fn eq(&self, other: &Self) -> bool {
    self.instance == other.instance
    && self.task_id == other.task_id
    && self.kind == other.kind
    && self.timestamp == other.timestamp
    && self.data_hash == other.data_hash
  }
}

impl Eq for WorkflowHandoverData {}

impl fmt::Display for WorkflowHandoverData {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} Task:{} @ {}", self.instance, self.kind, self.task_id, self.timestamp_pretty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn task_id_is_dropped_for_marker_kinds() {
    let whd = WorkflowHandoverData::new(WorkflowInstance(3), 9, HandoverKind::Split, 10);
    assert_eq!(whd.task_id(), 0);
    let whd = WorkflowHandoverData::intermediate(WorkflowInstance(3), 9, 10);
    assert_eq!(whd.task_id(), 9);
  }

  #[test]
  fn equality_ignores_payload_but_not_hash() {
    let mut a = WorkflowHandoverData::intermediate(WorkflowInstance(1), 2, 100);
    let mut b = a.clone();
    assert_eq!(a, b);
    a.set_workflow_data(b"factura".to_vec());
    assert_ne!(a, b);
    b.set_workflow_data(b"factura".to_vec());
    assert_eq!(a, b);
    assert_eq!(a.commitments().len(), 1);
  }

  #[test]
  fn kind_parses_case_insensitive() {
    assert_eq!("join".parse::<HandoverKind>().unwrap(), HandoverKind::Join);
    assert!("fork".parse::<HandoverKind>().is_err());
  }
}
