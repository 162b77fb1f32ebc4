// Archivo: domain.rs
// Propósito: tipos del grafo de ejecución: identidades de las partes y
// pasos del workflow (nodos del DAG con aristas por id).
use chain_domain::{HandoverData, HandoverKind, PublicKey, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nombre reservado para partes conocidas sólo por la cadena.
pub const UNKNOWN_COMPANY: &str = "Unknown_Company";

/// Identificador de un paso dentro del grafo.
pub type StepId = u32;

/// Parte que participa en el workflow.
///
/// La igualdad completa incluye la clave bitcoin expuesta en el último
/// traspaso; `relaxed_eq` sólo compara nombre y bandera `is_me`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
  company_name: String,
  is_me: bool,
  #[serde(default)]
  bitcoin_public_key: Option<PublicKey>,
}

impl Identity {
  pub fn new(company_name: impl Into<String>, is_me: bool) -> Self {
    Self { company_name: company_name.into(), is_me, bitcoin_public_key: None }
  }

  /// Identidad propia del participante local.
  pub fn own(company_name: impl Into<String>) -> Self {
    Self::new(company_name, true)
  }

  /// Identidad de otra organización.
  pub fn partner(company_name: impl Into<String>) -> Self {
    Self::new(company_name, false)
  }

  /// Comodín que produce la reconciliación para partes no identificadas.
  pub fn unknown() -> Self {
    Self::new(UNKNOWN_COMPANY, false)
  }

  pub fn is_unknown(&self) -> bool {
    self.company_name == UNKNOWN_COMPANY
  }

  pub fn company_name(&self) -> &str {
    &self.company_name
  }

  pub fn is_me(&self) -> bool {
    self.is_me
  }

  pub fn bitcoin_public_key(&self) -> Option<&PublicKey> {
    self.bitcoin_public_key.as_ref()
  }

  pub fn set_bitcoin_public_key(&mut self, key: Option<PublicKey>) {
    self.bitcoin_public_key = key;
  }

  pub fn with_bitcoin_public_key(mut self, key: PublicKey) -> Self {
    self.bitcoin_public_key = Some(key);
    self
  }

  pub fn relaxed_eq(&self, other: &Identity) -> bool {
    self.company_name == other.company_name && self.is_me == other.is_me
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} isMe:{}", self.company_name, self.is_me)
  }
}

/// Nodo del grafo: un paso del workflow y su transacción.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGraphStep {
  pub id: StepId,
  pub from: Identity,
  pub to: Identity,
  pub handover: HandoverData,
  #[serde(default)]
  pub parents: Vec<StepId>,
  #[serde(default)]
  pub children: Vec<StepId>,
}

impl WorkflowGraphStep {
  pub fn new(id: StepId, from: Identity, to: Identity, handover: HandoverData) -> Self {
    Self { id, from, to, handover, parents: Vec::new(), children: Vec::new() }
  }

  pub fn with_parents(mut self, parents: Vec<StepId>) -> Self {
    self.parents = parents;
    self
  }

  pub fn kind(&self) -> HandoverKind {
    self.handover.workflow_data().kind()
  }

  pub fn is_start(&self) -> bool {
    self.kind() == HandoverKind::Start
  }

  pub fn is_end(&self) -> bool {
    self.kind() == HandoverKind::End
  }

  pub fn is_template(&self) -> bool {
    self.handover.is_template()
  }

  pub fn tx_hash(&self) -> Option<TxHash> {
    self.handover.reference().map(|r| r.tx_hash())
  }

  pub fn output_count(&self) -> usize {
    self.handover.reference().map(|r| r.output_count()).unwrap_or(0)
  }

  /// Salidas donde el workflow puede continuar desde este paso.
  pub(crate) fn leaf_slots(&self) -> usize {
    match self.kind() {
      HandoverKind::Split if self.output_count() > 1 => (self.output_count() - 1).saturating_sub(self.children.len()),
      _ if self.children.is_empty() => 1,
      _ => 0,
    }
  }
}
