// Archivo: manager/maintenance.rs
// Propósito: republicación de pasos propios, espera de confirmaciones y
// reconciliación explícita con la cadena.
use super::{HandoverManager, ManagerState};
use crate::errors::{Result, WorkflowError};
use crate::negotiation::NegotiationGuard;
use chain_domain::{HandoverData, WorkflowInstance};
use flow::StepId;
use log::{debug, info};

impl HandoverManager {
  fn owned_publishable(state: &ManagerState, id: WorkflowInstance) -> Result<Vec<HandoverData>> {
    let graph = state.graph(id)?;
    Ok(graph.bfs()
            .into_iter()
            .filter_map(|s| graph.step(s))
            .filter(|s| s.handover.is_sender() && s.handover.contains_local_transaction() && !s.is_template())
            .map(|s| s.handover.clone())
            .collect())
  }

  fn locally_held(state: &ManagerState, id: WorkflowInstance) -> Result<Vec<(StepId, HandoverData)>> {
    let graph = state.graph(id)?;
    Ok(graph.bfs()
            .into_iter()
            .filter_map(|s| graph.step(s))
            .filter(|s| s.handover.contains_local_transaction() && !s.is_template())
            .map(|s| (s.id, s.handover.clone()))
            .collect())
  }

  async fn republish_locked(&self, state: &ManagerState, id: WorkflowInstance) -> Result<usize> {
    let handovers = Self::owned_publishable(state, id)?;
    for handover in &handovers {
      self.publisher.publish(handover, true).await?;
    }
    self.persist(state)?;
    Ok(handovers.len())
  }

  /// Vuelve a difundir los pasos que inició este participante y que el
  /// explorador aún no conoce.
  pub async fn republish_all_owned_handovers_for_instance(&self, id: WorkflowInstance) -> Result<usize> {
    debug!("republish_all_owned_handovers_for_instance({})", id);
    let state = self.state.lock().await;
    self.republish_locked(&state, id).await
  }

  pub async fn republish_all_owned_handovers(&self) -> Result<usize> {
    debug!("republish_all_owned_handovers()");
    let state = self.state.lock().await;
    let mut total = 0;
    for id in state.graphs.keys().copied().collect::<Vec<_>>() {
      total += self.republish_locked(&state, id).await?;
    }
    info!("{} pasos propios republicados", total);
    Ok(total)
  }

  async fn wait_locked(&self, state: &ManagerState, id: WorkflowInstance) -> Result<()> {
    for (step, handover) in Self::locally_held(state, id)? {
      if !self.publisher.publish_aggressively(&handover).await? {
        return Err(WorkflowError::ConfirmationTimeout(format!("el paso {} de {} no se confirmó", step, id)));
      }
    }
    Ok(())
  }

  /// Publica agresivamente cada paso con transacción local de la instancia
  /// hasta que todos estén confirmados.
  pub async fn wait_for_confirmation_on_instance(&self, id: WorkflowInstance) -> Result<()> {
    debug!("wait_for_confirmation_on_instance({})", id);
    let state = self.state.lock().await;
    self.wait_locked(&state, id).await
  }

  pub async fn wait_for_confirmation_on_all(&self) -> Result<()> {
    debug!("wait_for_confirmation_on_all()");
    let state = self.state.lock().await;
    for id in state.graphs.keys().copied().collect::<Vec<_>>() {
      self.wait_locked(&state, id).await?;
    }
    Ok(())
  }

  /// Espera la confirmación de un paso concreto.
  pub async fn wait_for_confirmation_on_handover(&self, id: WorkflowInstance, step: StepId) -> Result<()> {
    debug!("wait_for_confirmation_on_handover({}, {})", id, step);
    let state = self.state.lock().await;
    let handover = state.graph(id)?.require(step)?.handover.clone();
    if !handover.contains_local_transaction() || handover.is_template() {
      return Err(WorkflowError::WorkflowStateViolation(format!("el paso {} no tiene una transacción completa", step)));
    }
    if !self.publisher.publish_aggressively(&handover).await? {
      return Err(WorkflowError::ConfirmationTimeout(format!("el paso {} de {} no se confirmó", step, id)));
    }
    Ok(())
  }

  /// Reconcilia la instancia con la cadena, si existe, y libera el
  /// cerrojo. Devuelve si el grafo cambió.
  pub async fn update_workflow_with_online_information(&self, guard: NegotiationGuard, id: WorkflowInstance) -> Result<bool> {
    debug!("update_workflow_with_online_information({})", id);
    self.check_lock(&guard)?;
    let mut state = self.state.lock().await;
    let changed = if state.graphs.contains_key(&id) {
      let changed = self.reconcile_locked(&mut state, id).await?;
      self.persist(&state)?;
      changed
    } else {
      false
    };
    drop(guard);
    Ok(changed)
  }
}
