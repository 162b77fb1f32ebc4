// Archivo: manager/queries.rs
// Propósito: consultas sobre el almacén de grafos y la billetera.
use super::{checks, HandoverManager};
use crate::errors::{Result, WorkflowError};
use crate::negotiation::NegotiationGuard;
use chain_domain::{Address, HandoverKind, PublicKey, TxHash, WorkflowInstance};
use flow::{StepId, WorkflowGraph, WorkflowGraphStep};
use log::{debug, info};

impl HandoverManager {
  pub async fn workflow_exists(&self, id: WorkflowInstance) -> bool {
    self.state.lock().await.graphs.contains_key(&id)
  }

  pub async fn workflow_was_ended(&self, id: WorkflowInstance) -> Result<bool> {
    let state = self.state.lock().await;
    Ok(state.graph(id)?.contains_end())
  }

  /// Huecos de hoja cuyo destinatario somos nosotros; un SPLIT aparece
  /// una vez por salida libre. Libera el cerrojo al terminar.
  pub async fn leaf_ids_that_belong_to_us(&self, guard: NegotiationGuard, id: WorkflowInstance, update_first: bool) -> Result<Vec<StepId>> {
    debug!("leaf_ids_that_belong_to_us({}, {})", id, update_first);
    self.check_lock(&guard)?;
    let mut state = self.state.lock().await;
    if update_first {
      state.graph(id)?;
      self.reconcile_locked(&mut state, id).await?;
      self.persist(&state)?;
    }
    let graph = state.graph(id)?;
    let leaves = graph.leaves()
                      .into_iter()
                      .filter(|l| graph.step(*l).map(|s| s.to == self.own).unwrap_or(false))
                      .collect();
    drop(guard);
    Ok(leaves)
  }

  /// `true` si el paso es un INTERMEDIATE completo cuya tarea está entre
  /// las que espera un JOIN.
  pub async fn is_incoming_path_of_and_join(&self, id: WorkflowInstance, step: StepId, ids_to_wait_on: &[u8]) -> Result<bool> {
    let state = self.state.lock().await;
    let step = state.graph(id)?.require(step)?;
    Ok(step.kind() == HandoverKind::Intermediate
       && !step.is_template()
       && ids_to_wait_on.contains(&step.handover.workflow_data().task_id()))
  }

  pub async fn bitcoin_public_key_of_step_output(&self, id: WorkflowInstance, step: StepId, output_idx: u32) -> Result<PublicKey> {
    let state = self.state.lock().await;
    let step = state.graph(id)?.require(step)?;
    Ok(step.handover.key_for_output(output_idx)?.clone())
  }

  /// Compromisos del redeem script de una salida; forman parte de la
  /// dirección expuesta que buscará el siguiente receptor.
  pub async fn data_included_in_step_output(&self, id: WorkflowInstance, step: StepId, output_idx: u32) -> Result<Vec<Vec<u8>>> {
    let state = self.state.lock().await;
    Ok(state.graph(id)?.require(step)?.handover.commitments_for_output(output_idx))
  }

  pub async fn tx_hash_of_step(&self, id: WorkflowInstance, step: StepId) -> Result<Option<TxHash>> {
    let state = self.state.lock().await;
    Ok(state.graph(id)?.require(step)?.tx_hash())
  }

  pub async fn workflow_instance_as_clone(&self, id: WorkflowInstance) -> Option<WorkflowGraph> {
    self.state.lock().await.graphs.get(&id).cloned()
  }

  pub async fn describe_workflow_instance(&self, id: WorkflowInstance, include_technical: bool) -> Option<Vec<String>> {
    self.state
        .lock()
        .await
        .graphs
        .get(&id)
        .map(|g| g.describe(include_technical))
  }

  pub async fn print_workflow_instance_information(&self, id: WorkflowInstance, include_technical: bool) {
    match self.describe_workflow_instance(id, include_technical).await {
      Some(lines) => {
        info!("Información guardada de la instancia {}", id);
        for line in lines {
          info!("{}", line);
        }
      }
      None => info!("No hay información guardada de la instancia {}", id),
    }
  }

  pub async fn print_all_workflow_information(&self, include_technical: bool) {
    let ids: Vec<WorkflowInstance> = self.state.lock().await.graphs.keys().copied().collect();
    for id in ids {
      self.print_workflow_instance_information(id, include_technical).await;
    }
  }

  /// Evalúa `predicate` sobre un paso; `false` si el paso no existe.
  pub async fn run_predicate_on_step<F>(&self, id: WorkflowInstance, step: StepId, predicate: F) -> bool
    where F: FnOnce(&WorkflowGraphStep) -> bool
  {
    let state = self.state.lock().await;
    state.graphs
         .get(&id)
         .and_then(|g| g.step(step))
         .map(predicate)
         .unwrap_or(false)
  }

  /// Pasos de la instancia que cumplen `predicate`, en orden BFS.
  pub async fn steps_where<F>(&self, id: WorkflowInstance, predicate: F) -> Result<Vec<StepId>>
    where F: Fn(&WorkflowGraphStep) -> bool
  {
    let state = self.state.lock().await;
    Ok(Self::step_ids_where(state.graph(id)?, predicate))
  }

  pub async fn balance(&self) -> Result<u64> {
    Ok(self.chain.balance().await?)
  }

  pub async fn address_to_pay_money_to(&self) -> Result<Address> {
    Ok(self.chain.fresh_receive_address().await?)
  }

  /// Instancia que aún no existe en este almacén con el menor id libre.
  pub async fn unused_instance_id(&self) -> Result<WorkflowInstance> {
    let state = self.state.lock().await;
    (0..=u16::MAX).map(WorkflowInstance)
                  .find(|id| checks::workflow_not_exists(&state.graphs, *id).is_ok())
                  .ok_or_else(|| WorkflowError::WorkflowStateViolation("no quedan ids de instancia libres".to_string()))
  }
}
