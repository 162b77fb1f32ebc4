// Archivo: manager/transitions.rs
// Propósito: transiciones iniciadas por este participante: START, SPLIT,
// JOIN, END y el lado emisor de un traspaso (plantilla + publicación).
//
// Las variantes `_async` publican una vez y vuelven; las bloqueantes además
// esperan la profundidad de confirmación configurada.
use super::{checks, HandoverManager, HandoverTerms, ManagerState};
use crate::errors::{Result, WorkflowError};
use crate::negotiation::NegotiationGuard;
use chain_domain::{estimate_token_size, HandoverData, SpendableToken, WorkflowHandoverData, WorkflowInstance};
use flow::{Identity, StepId, WorkflowGraph, WorkflowGraphStep};
use log::{debug, info, warn};

impl HandoverManager {
  /// Espera la confirmación de un paso recién publicado. No alcanzarla no
  /// es un error: la transacción sigue en la red.
  async fn confirm_published(&self, id: WorkflowInstance, step: StepId, handover: &HandoverData) -> Result<()> {
    if !self.publisher.publish_aggressively(handover).await? {
      warn!("el paso {} de {} sigue sin confirmar", step, id);
    }
    Ok(())
  }

  // ----- START -----

  async fn start_locked(&self,
                        state: &mut ManagerState,
                        id: WorkflowInstance,
                        expected_steps: u32,
                        expected_splits: u32)
                        -> Result<(StepId, HandoverData)> {
    checks::workflow_not_exists(&state.graphs, id)?;
    let token_size = estimate_token_size(expected_steps, expected_splits);
    let key = self.chain.fresh_key().await?;
    let whd = WorkflowHandoverData::start(id, Self::now());
    let skeleton = self.builder.start_skeleton(&whd, &key, token_size)?;
    let funded = self.chain.complete_start_transaction(skeleton).await?;
    let handover = self.builder.start_handover(&whd, &key, funded, token_size)?;
    let step_id = state.ids.next_id();
    let root = WorkflowGraphStep::new(step_id, self.own.clone(), self.own.clone(), handover.clone());
    state.graphs.insert(id, WorkflowGraph::new(id, root));
    self.persist(state)?;
    info!("{} inicia el workflow {} con un token de {} sat", self.own.company_name(), id, token_size);
    Ok((step_id, handover))
  }

  /// Crea el workflow y publica su START sin esperar confirmación.
  pub async fn start_workflow_async(&self, id: WorkflowInstance, expected_steps: u32, expected_splits: u32) -> Result<StepId> {
    debug!("start_workflow_async({}, {}, {})", id, expected_steps, expected_splits);
    let mut state = self.state.lock().await;
    let (step, handover) = self.start_locked(&mut state, id, expected_steps, expected_splits).await?;
    self.publisher.publish(&handover, false).await?;
    Ok(step)
  }

  pub async fn start_workflow(&self, id: WorkflowInstance, expected_steps: u32, expected_splits: u32) -> Result<StepId> {
    debug!("start_workflow({}, {}, {})", id, expected_steps, expected_splits);
    let mut state = self.state.lock().await;
    let (step, handover) = self.start_locked(&mut state, id, expected_steps, expected_splits).await?;
    self.publisher.publish(&handover, false).await?;
    self.confirm_published(id, step, &handover).await?;
    Ok(step)
  }

  // ----- SPLIT -----

  async fn split_locked(&self,
                        state: &mut ManagerState,
                        id: WorkflowInstance,
                        from_step: StepId,
                        output_idx: u32,
                        paths: usize)
                        -> Result<(StepId, HandoverData)> {
    let graph = state.graph(id)?;
    checks::not_ended(graph)?;
    checks::is_leaf(graph, from_step)?;
    let from = graph.require(from_step)?;
    checks::step_belongs_to(from, &self.own, false)?;
    checks::not_template(from)?;
    let prev = SpendableToken::from_handover(&from.handover, output_idx)?;

    let mut keys = Vec::with_capacity(paths);
    for _ in 0..paths {
      keys.push(self.chain.fresh_key().await?);
    }
    let whd = WorkflowHandoverData::split(id, Self::now());
    let handover = self.builder.split(&whd, &prev, &keys, &self.signer())?;
    let step_id = state.ids.next_id();
    let step = WorkflowGraphStep::new(step_id, self.own.clone(), self.own.clone(), handover.clone());
    state.graph_mut(id)?.add_child(&[from_step], step)?;
    self.persist(state)?;
    Ok((step_id, handover))
  }

  /// Divide el token de la salida `output_idx` de `from_step` en `paths`
  /// caminos paralelos.
  pub async fn split_workflow_async(&self, id: WorkflowInstance, from_step: StepId, output_idx: u32, paths: usize) -> Result<StepId> {
    debug!("split_workflow_async({}, {}, {}, {})", id, from_step, output_idx, paths);
    let mut state = self.state.lock().await;
    let (step, handover) = self.split_locked(&mut state, id, from_step, output_idx, paths).await?;
    self.publisher.publish(&handover, false).await?;
    Ok(step)
  }

  pub async fn split_workflow(&self, id: WorkflowInstance, from_step: StepId, output_idx: u32, paths: usize) -> Result<StepId> {
    debug!("split_workflow({}, {}, {}, {})", id, from_step, output_idx, paths);
    let mut state = self.state.lock().await;
    let (step, handover) = self.split_locked(&mut state, id, from_step, output_idx, paths).await?;
    self.publisher.publish(&handover, false).await?;
    self.confirm_published(id, step, &handover).await?;
    Ok(step)
  }

  // ----- JOIN -----

  async fn join_locked(&self,
                       state: &mut ManagerState,
                       id: WorkflowInstance,
                       from_steps: &[StepId],
                       timestamp: u32,
                       output_idxs: &[u32])
                       -> Result<(StepId, HandoverData)> {
    if from_steps.len() != output_idxs.len() {
      return Err(WorkflowError::Validation(format!("{} pasos de origen y {} salidas", from_steps.len(), output_idxs.len())));
    }
    let graph = state.graph(id)?;
    checks::not_ended(graph)?;
    let mut prevs = Vec::with_capacity(from_steps.len());
    for (step_id, output) in from_steps.iter().zip(output_idxs) {
      checks::is_leaf(graph, *step_id)?;
      let step = graph.require(*step_id)?;
      checks::step_belongs_to(step, &self.own, false)?;
      checks::not_template(step)?;
      prevs.push(SpendableToken::from_handover(&step.handover, *output)?);
    }
    let mut parents: Vec<StepId> = Vec::new();
    for step_id in from_steps {
      if !parents.contains(step_id) {
        parents.push(*step_id);
      }
    }

    let key = self.chain.fresh_key().await?;
    let whd = WorkflowHandoverData::join(id, timestamp);
    let handover = self.builder.join(&whd, &prevs, &key, &self.signer())?;
    let step_id = state.ids.next_id();
    let step = WorkflowGraphStep::new(step_id, self.own.clone(), self.own.clone(), handover.clone());
    state.graph_mut(id)?.add_child(&parents, step)?;
    self.persist(state)?;
    Ok((step_id, handover))
  }

  /// Une los tokens de varios caminos en uno. `from_steps[i]` aporta su
  /// salida `output_idxs[i]`.
  pub async fn join_workflow_async(&self,
                                   id: WorkflowInstance,
                                   from_steps: &[StepId],
                                   timestamp: u32,
                                   output_idxs: &[u32])
                                   -> Result<StepId> {
    debug!("join_workflow_async({}, {:?}, {:?})", id, from_steps, output_idxs);
    let mut state = self.state.lock().await;
    let (step, handover) = self.join_locked(&mut state, id, from_steps, timestamp, output_idxs).await?;
    self.publisher.publish(&handover, false).await?;
    Ok(step)
  }

  pub async fn join_workflow(&self, id: WorkflowInstance, from_steps: &[StepId], timestamp: u32, output_idxs: &[u32]) -> Result<StepId> {
    debug!("join_workflow({}, {:?}, {:?})", id, from_steps, output_idxs);
    let mut state = self.state.lock().await;
    let (step, handover) = self.join_locked(&mut state, id, from_steps, timestamp, output_idxs).await?;
    self.publisher.publish(&handover, false).await?;
    self.confirm_published(id, step, &handover).await?;
    Ok(step)
  }

  // ----- END -----

  async fn end_locked(&self,
                      state: &mut ManagerState,
                      id: WorkflowInstance,
                      relaxed_ownership: bool,
                      react_on_previous_template: bool)
                      -> Result<(StepId, HandoverData)> {
    let graph = state.graph(id)?;
    checks::not_ended(graph)?;
    let leaf_id = if relaxed_ownership {
      checks::single_leaf(graph)?
    } else {
      checks::started_by(graph, &self.own)?;
      let leaf = checks::single_leaf(graph)?;
      checks::step_belongs_to(graph.require(leaf)?, &self.own, false)?;
      leaf
    };

    let mut leaf = graph.require(leaf_id)?;
    let mut abandoned = None;
    if leaf.is_template() {
      if !react_on_previous_template {
        checks::not_template(leaf)?;
      }
      // Se abandona la plantilla y se cierra desde el paso anterior.
      let parent = leaf.parents
                       .first()
                       .copied()
                       .ok_or_else(|| WorkflowError::WorkflowStateViolation(format!("la plantilla {} no tiene padre", leaf.id)))?;
      abandoned = Some(leaf.id);
      leaf = graph.require(parent)?;
    }
    let from_step = leaf.id;
    let output = leaf.handover.reference().and_then(|r| r.output_with_token()).unwrap_or(0);
    let prev = SpendableToken::from_handover(&leaf.handover, output)?;

    let destination = self.chain.fresh_receive_address().await?;
    let whd = WorkflowHandoverData::end(id, Self::now());
    let handover = self.builder.end(&whd, &prev, &destination, &self.signer())?;
    let step_id = state.ids.next_id();
    let graph = state.graph_mut(id)?;
    if let Some(template) = abandoned {
      graph.detach(template)?;
    }
    let step = WorkflowGraphStep::new(step_id, self.own.clone(), self.own.clone(), handover.clone());
    graph.add_child(&[from_step], step)?;
    self.persist(state)?;
    info!("{} cierra el workflow {} pagando a {}", self.own.company_name(), id, destination);
    Ok((step_id, handover))
  }

  /// Cierra el workflow. Sin `relaxed_ownership` el workflow debe haber
  /// sido iniciado por nosotros y su única hoja ser nuestra. Con
  /// `react_on_previous_template` una hoja plantilla se descarta y se
  /// cierra desde su padre.
  pub async fn end_workflow_async(&self, id: WorkflowInstance, relaxed_ownership: bool, react_on_previous_template: bool) -> Result<StepId> {
    debug!("end_workflow_async({}, {}, {})", id, relaxed_ownership, react_on_previous_template);
    let mut state = self.state.lock().await;
    let (step, handover) = self.end_locked(&mut state, id, relaxed_ownership, react_on_previous_template).await?;
    self.publisher.publish(&handover, false).await?;
    Ok(step)
  }

  pub async fn end_workflow(&self, id: WorkflowInstance, relaxed_ownership: bool, react_on_previous_template: bool) -> Result<StepId> {
    debug!("end_workflow({}, {}, {})", id, relaxed_ownership, react_on_previous_template);
    let mut state = self.state.lock().await;
    let (step, handover) = self.end_locked(&mut state, id, relaxed_ownership, react_on_previous_template).await?;
    self.publisher.publish(&handover, false).await?;
    self.confirm_published(id, step, &handover).await?;
    Ok(step)
  }

  // ----- traspaso, lado emisor -----

  /// Prepara la plantilla de traspaso hacia `to`, que debe traer la clave
  /// que el receptor generó en `init_handover_on_receiver_side`. Devuelve la
  /// transacción serializada para enviarla al receptor.
  pub async fn create_handover_template(&self,
                                        guard: &NegotiationGuard,
                                        id: WorkflowInstance,
                                        from_step: StepId,
                                        to: &Identity,
                                        terms: HandoverTerms,
                                        update_first: bool,
                                        output_idx: u32)
                                        -> Result<Vec<u8>> {
    debug!("create_handover_template({}, {}, {}, {:?})", id, from_step, to, terms);
    self.check_lock(guard)?;
    let mut state = self.state.lock().await;
    state.graph(id)?;
    if update_first {
      self.reconcile_locked(&mut state, id).await?;
    }
    let graph = state.graph(id)?;
    checks::not_ended(graph)?;
    checks::is_leaf(graph, from_step)?;
    let from = graph.require(from_step)?;
    checks::step_belongs_to(from, &self.own, false)?;
    checks::not_template(from)?;
    let receiver = to.bitcoin_public_key()
                     .ok_or_else(|| WorkflowError::Validation(format!("{} no trae clave bitcoin", to)))?;

    let whd = WorkflowHandoverData::intermediate(id, terms.task_id, terms.timestamp).with_workflow_data(terms.data);
    let prev = SpendableToken::from_handover(&from.handover, output_idx)?;
    let template = self.builder.handover_template(&whd, &prev, receiver)?;
    let serialized = template.reference()
                             .ok_or_else(|| WorkflowError::Validation("la plantilla no tiene transacción".to_string()))?
                             .serialize()?;
    let step_id = state.ids.next_id();
    let step = WorkflowGraphStep::new(step_id, self.own.clone(), to.clone(), template);
    state.graph_mut(id)?.add_child(&[from_step], step)?;
    self.persist(&state)?;
    debug!("plantilla {} creada en {}", step_id, id);
    Ok(serialized)
  }

  async fn finish_and_publish_locked(&self,
                                     state: &mut ManagerState,
                                     id: WorkflowInstance,
                                     to: &Identity,
                                     off_chain_signature: &[u8],
                                     output_idx: u32)
                                     -> Result<(StepId, HandoverData)> {
    let graph = state.graph(id)?;
    let step = graph.distinct_leaves()
                    .into_iter()
                    .filter_map(|l| graph.step(l))
                    .find(|s| s.from == self.own && &s.to == to)
                    .ok_or_else(|| WorkflowError::WorkflowStateViolation(format!("no hay un traspaso hacia {} en {}", to, id)))?;
    if !step.is_template() {
      return Err(WorkflowError::WorkflowStateViolation(format!("el paso {} ya no es una plantilla", step.id)));
    }
    let parent = step.parents
                     .first()
                     .copied()
                     .ok_or_else(|| WorkflowError::WorkflowStateViolation(format!("la plantilla {} no tiene padre", step.id)))?;
    let prev = SpendableToken::from_handover(&graph.require(parent)?.handover, output_idx)?;
    let finished = self.builder
                       .finish_handover_template(&step.handover, &prev, off_chain_signature, &self.signer())?;
    let step_id = step.id;
    state.graph_mut(id)?.require_mut(step_id)?.handover = finished.clone();
    self.persist(state)?;
    Ok((step_id, finished))
  }

  /// Completa la plantilla con la firma off-chain del receptor, la publica
  /// y libera el cerrojo de negociación.
  pub async fn finish_and_publish_handover_template_async(&self,
                                                          guard: NegotiationGuard,
                                                          id: WorkflowInstance,
                                                          to: &Identity,
                                                          off_chain_signature: &[u8],
                                                          output_idx: u32)
                                                          -> Result<StepId> {
    debug!("finish_and_publish_handover_template_async({}, {})", id, to);
    self.check_lock(&guard)?;
    let mut state = self.state.lock().await;
    let (step, handover) = self.finish_and_publish_locked(&mut state, id, to, off_chain_signature, output_idx).await?;
    self.publisher.publish(&handover, false).await?;
    drop(guard);
    Ok(step)
  }

  pub async fn finish_and_publish_handover_template(&self,
                                                    guard: NegotiationGuard,
                                                    id: WorkflowInstance,
                                                    to: &Identity,
                                                    off_chain_signature: &[u8],
                                                    output_idx: u32)
                                                    -> Result<StepId> {
    debug!("finish_and_publish_handover_template({}, {})", id, to);
    self.check_lock(&guard)?;
    let mut state = self.state.lock().await;
    let (step, handover) = self.finish_and_publish_locked(&mut state, id, to, off_chain_signature, output_idx).await?;
    self.publisher.publish(&handover, false).await?;
    drop(guard);
    self.confirm_published(id, step, &handover).await?;
    Ok(step)
  }

  /// Limpieza tras un traspaso fallido en el emisor: libera el cerrojo y
  /// fuerza un END desde el paso anterior a la plantilla. Los fallos sólo
  /// se registran.
  pub async fn abort_handover(&self, guard: Option<NegotiationGuard>, id: WorkflowInstance) -> bool {
    self.conditionally_release_lock(guard);
    match self.end_workflow_async(id, true, true).await {
      Ok(step) => {
        warn!("traspaso abortado en {}: END forzado en el paso {}", id, step);
        true
      }
      Err(e) => {
        warn!("no se pudo cerrar {} tras abortar el traspaso: {}", id, e);
        false
      }
    }
  }
}
