// Archivo: manager/mod.rs
// Propósito: gestor de traspasos de un participante. Mantiene el almacén de
// grafos (uno por instancia), lo persiste tras cada mutación y coordina la
// billetera, el explorador y el constructor de transacciones.
//
// Cada operación pública toma el mutex de estado durante toda su
// ejecución; las rondas de negociación además exigen la guarda del
// cerrojo de negociación.
mod checks;
mod maintenance;
mod queries;
mod receiver;
mod transitions;

use crate::config::ManagerConfig;
use crate::errors::{Result, WorkflowError};
use crate::negotiation::{NegotiationGuard, NegotiationLock};
use crate::publisher::Publisher;
use crate::reconciliation::ReconciliationEngine;
use chain_domain::{DomainError, PublicKey, ShapeBuilder, TransactionSigner, WorkflowInstance};
use chain_providers::{ChainConnection, Explorer};
use flow::{GraphRepository, GraphSnapshot, IdAllocator, Identity, StepId, WorkflowGraph};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use receiver::ReceiverFinish;

/// Condiciones de un traspaso acordadas fuera de la cadena: marca de
/// tiempo, tarea siguiente y payload opcional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverTerms {
  pub timestamp: u32,
  pub task_id: u8,
  pub data: Option<Vec<u8>>,
}

impl HandoverTerms {
  pub fn new(timestamp: u32, task_id: u8, data: Option<Vec<u8>>) -> Self {
    Self { timestamp, task_id, data }
  }
}

/// Estado protegido por el mutex del gestor.
pub(crate) struct ManagerState {
  pub(crate) graphs: BTreeMap<WorkflowInstance, WorkflowGraph>,
  pub(crate) ids: IdAllocator,
}

impl ManagerState {
  pub(crate) fn graph(&self, id: WorkflowInstance) -> Result<&WorkflowGraph> {
    checks::workflow_exists(&self.graphs, id)
  }

  pub(crate) fn graph_mut(&mut self, id: WorkflowInstance) -> Result<&mut WorkflowGraph> {
    self.graphs
        .get_mut(&id)
        .ok_or_else(|| WorkflowError::WorkflowStateViolation(format!("el workflow {} no existe", id)))
  }
}

pub struct HandoverManager {
  own: Identity,
  chain: Arc<dyn ChainConnection>,
  explorer: Arc<dyn Explorer>,
  repository: Arc<dyn GraphRepository>,
  builder: ShapeBuilder,
  publisher: Publisher,
  config: ManagerConfig,
  negotiation: NegotiationLock,
  state: Mutex<ManagerState>,
}

/// Adaptador para firmar con la billetera a través de `TransactionSigner`.
pub(crate) struct ChainSigner<'a>(&'a dyn ChainConnection);

impl TransactionSigner for ChainSigner<'_> {
  fn sign_digest(&self, key: &PublicKey, digest: &[u8; 32]) -> std::result::Result<Vec<u8>, DomainError> {
    self.0.sign_digest(key, digest)
  }
}

impl HandoverManager {
  /// Crea el gestor cargando el último estado guardado en `repository`.
  pub fn new(own: Identity,
             chain: Arc<dyn ChainConnection>,
             explorer: Arc<dyn Explorer>,
             repository: Arc<dyn GraphRepository>,
             config: ManagerConfig)
             -> Result<Self> {
    let (ids, graphs) = repository.load()?.into_parts();
    info!("gestor de {} iniciado con {} workflows", own.company_name(), graphs.len());
    Ok(Self { publisher: Publisher::new(chain.clone(), explorer.clone(), config.clone()),
              builder: ShapeBuilder::new(config.fee_per_kb),
              own,
              chain,
              explorer,
              repository,
              config,
              negotiation: NegotiationLock::new(),
              state: Mutex::new(ManagerState { graphs, ids }) })
  }

  pub fn own_identity(&self) -> &Identity {
    &self.own
  }

  pub fn config(&self) -> &ManagerConfig {
    &self.config
  }

  // ----- cerrojo de negociación -----

  pub async fn acquire_lock(&self) -> NegotiationGuard {
    self.negotiation.acquire().await
  }

  pub fn try_acquire_lock(&self) -> Option<NegotiationGuard> {
    self.negotiation.try_acquire()
  }

  pub fn is_locked(&self) -> bool {
    self.negotiation.is_locked()
  }

  pub fn conditionally_release_lock(&self, guard: Option<NegotiationGuard>) {
    NegotiationLock::conditionally_release(guard);
  }

  // ----- utilidades internas -----

  pub(crate) fn signer(&self) -> ChainSigner<'_> {
    ChainSigner(self.chain.as_ref())
  }

  pub(crate) fn check_lock(&self, guard: &NegotiationGuard) -> Result<()> {
    self.negotiation.check(guard)
  }

  /// Reescribe el almacén completo.
  pub(crate) fn persist(&self, state: &ManagerState) -> Result<()> {
    self.repository.save(&GraphSnapshot::new(state.ids, &state.graphs))?;
    debug!("almacén de {} guardado ({} workflows)", self.own.company_name(), state.graphs.len());
    Ok(())
  }

  /// Reconciliación de una instancia existente; reemplaza el grafo.
  pub(crate) async fn reconcile_locked(&self, state: &mut ManagerState, id: WorkflowInstance) -> Result<bool> {
    let graph = state.graph(id)?.clone();
    let engine = ReconciliationEngine::new(self.explorer.as_ref(), &mut state.ids);
    let reconciled = engine.reconcile(graph).await?;
    state.graphs.insert(id, reconciled.graph);
    Ok(reconciled.changed)
  }

  pub(crate) fn now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32
  }

  pub(crate) fn step_ids_where<F>(graph: &WorkflowGraph, pred: F) -> Vec<StepId>
    where F: Fn(&flow::WorkflowGraphStep) -> bool
  {
    graph.bfs()
         .into_iter()
         .filter(|id| graph.step(*id).map(&pred).unwrap_or(false))
         .collect()
  }
}
