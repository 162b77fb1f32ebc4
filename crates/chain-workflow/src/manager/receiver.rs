// Archivo: manager/receiver.rs
// Propósito: lado receptor de un traspaso. El receptor genera la clave a la
// que irá el token, comprueba la plantilla del emisor antes de firmarla
// fuera de la cadena y, una vez publicada, reconstruye la transacción
// final para verificar que es exactamente la acordada.
use super::{checks, HandoverManager, HandoverTerms};
use crate::errors::{Result, WorkflowError};
use crate::negotiation::NegotiationGuard;
use crate::reconciliation::ReconciliationEngine;
use chain_domain::classifier::is_intermediate;
use chain_domain::hashing::hash160;
use chain_domain::script::{exposed_address, p2sh_output_script, redeem_script_for_key};
use chain_domain::{offchain, HandoverData, LocalTransaction, PublicKey, Transaction, TransactionReference, TxOut, WorkflowHandoverData,
                   WorkflowInstance};
use flow::{Identity, StepId};
use log::{debug, info, warn};

/// Resultado de `finish_handover_template_on_receiver_side`.
#[derive(Debug)]
pub enum ReceiverFinish {
  /// El traspaso está publicado y verificado; el cerrojo se liberó.
  Finished(StepId),
  /// El emisor aún no publicó; se devuelve la guarda para reintentar.
  Pending(NegotiationGuard),
}

impl HandoverManager {
  /// Prepara la recepción de un traspaso desde `from`, que debe traer la
  /// clave de su hoja actual. Reconcilia antes (o descubre el workflow a
  /// partir de la dirección expuesta del emisor), añade una plantilla como
  /// hija de la hoja que expone esa dirección y devuelve la clave nueva a
  /// la que el emisor debe enviar el token.
  #[allow(clippy::too_many_arguments)]
  pub async fn init_handover_on_receiver_side(&self,
                                              guard: &NegotiationGuard,
                                              id: WorkflowInstance,
                                              from: &Identity,
                                              terms: HandoverTerms,
                                              previously_included: Option<Vec<Vec<u8>>>,
                                              relax_owner_check: bool)
                                              -> Result<PublicKey> {
    debug!("init_handover_on_receiver_side({}, {}, {:?})", id, from, terms);
    self.check_lock(guard)?;
    let sender_key = from.bitcoin_public_key()
                         .ok_or_else(|| WorkflowError::Validation(format!("{} no trae clave bitcoin", from)))?;
    let address = exposed_address(sender_key, &previously_included.unwrap_or_default());

    let mut state = self.state.lock().await;
    if state.graphs.contains_key(&id) {
      self.reconcile_locked(&mut state, id).await?;
    } else {
      let engine = ReconciliationEngine::new(self.explorer.as_ref(), &mut state.ids);
      let discovered = engine.discover(id, &address).await?;
      info!("{} descubrió el workflow {} ({} pasos)", self.own.company_name(), id, discovered.graph.len());
      state.graphs.insert(id, discovered.graph);
    }

    let graph = state.graph(id)?;
    checks::not_ended(graph)?;
    let leaf = graph.distinct_leaves()
                    .into_iter()
                    .filter_map(|l| graph.step(l))
                    .find(|s| {
                      s.handover
                       .reference()
                       .map(|r| (0..r.output_count()).any(|i| r.output_address(i).as_ref() == Some(&address)))
                       .unwrap_or(false)
                    })
                    .ok_or_else(|| {
                      WorkflowError::WorkflowStateViolation(format!("ninguna hoja de {} expone la dirección {}", id, address))
                    })?;
    checks::step_belongs_to(leaf, from, relax_owner_check)?;
    let leaf_id = leaf.id;

    let key = self.chain.fresh_key().await?;
    let whd = WorkflowHandoverData::intermediate(id, terms.task_id, terms.timestamp).with_workflow_data(terms.data);
    let commitments = vec![whd.commitments()];
    let handover = HandoverData::new(whd, None, vec![key.clone()], commitments, false, true)?;
    let step_id = state.ids.next_id();
    let step = flow::WorkflowGraphStep::new(step_id, from.clone(), self.own.clone(), handover);
    state.graph_mut(id)?.add_child(&[leaf_id], step)?;
    self.persist(&state)?;
    debug!("plantilla de recepción {} creada tras el paso {}", step_id, leaf_id);
    Ok(key)
  }

  /// Fija el payload esperado de la plantilla pendiente de `from` y su
  /// compromiso.
  pub async fn set_handover_data_on_receiver_side(&self,
                                                  guard: &NegotiationGuard,
                                                  id: WorkflowInstance,
                                                  from: &Identity,
                                                  data: Vec<u8>)
                                                  -> Result<()> {
    debug!("set_handover_data_on_receiver_side({}, {}, {} bytes)", id, from, data.len());
    self.check_lock(guard)?;
    let mut state = self.state.lock().await;
    let step_id = checks::leaf_template_from(state.graph(id)?, &self.own, from)?;
    let step = state.graph_mut(id)?.require_mut(step_id)?;
    let commitment = hash160(&data).to_vec();
    step.handover.workflow_data_mut().set_workflow_data(data);
    step.handover.set_commitments(vec![vec![commitment]]);
    self.persist(&state)?;
    Ok(())
  }

  /// Verifica la plantilla recibida del emisor y devuelve la firma
  /// off-chain del receptor sobre su forma canónica.
  ///
  /// Se comprueba que los metadatos sean los acordados, que la salida
  /// pague al P2SH de nuestra clave con los compromisos esperados y que el
  /// redeem script del input corresponda a la salida que se gasta según
  /// el explorador.
  pub async fn confirm_handover_template_on_receiver_side(&self,
                                                          guard: &NegotiationGuard,
                                                          id: WorkflowInstance,
                                                          from: &Identity,
                                                          serialized_template: &[u8])
                                                          -> Result<Vec<u8>> {
    debug!("confirm_handover_template_on_receiver_side({}, {})", id, from);
    self.check_lock(guard)?;
    let mut state = self.state.lock().await;
    let step_id = checks::leaf_template_from(state.graph(id)?, &self.own, from)?;
    let expected = state.graph(id)?.require(step_id)?.handover.clone();
    let receiver_key = expected.key_for_output(0)?.clone();

    let tx = Transaction::deserialize(serialized_template)?;
    let block = is_intermediate(&tx, &[]).ok_or_else(|| WorkflowError::Validation("la plantilla no es un INTERMEDIATE".to_string()))?;
    let received_whd = block.to_handover_data()
                            .with_workflow_data(expected.workflow_data().workflow_data().map(|d| d.to_vec()));

    let spent = tx.inputs
                  .first()
                  .map(|i| i.previous_output)
                  .ok_or_else(|| WorkflowError::Validation("la plantilla no tiene inputs".to_string()))?;
    let connected: TxOut = self.explorer
                               .transaction(&spent.txid)
                               .await?
                               .and_then(|o| o.outputs.get(spent.vout as usize).cloned())
                               .map(|o| TxOut { value: o.value, script_pubkey: o.script })
                               .ok_or_else(|| WorkflowError::Validation(format!("el explorador no conoce la salida {}", spent)))?;

    let commitments = vec![received_whd.commitments()];
    let reference = TransactionReference::local(LocalTransaction::new(tx.clone(), vec![Some(connected.clone())]), vec![0]);
    let received = HandoverData::new(received_whd, Some(reference), vec![receiver_key.clone()], commitments, false, true)?;

    if expected.workflow_data() != received.workflow_data() {
      return Err(not_agreed("los metadatos difieren de los acordados"));
    }
    let redeem = redeem_script_for_key(&receiver_key, &received.commitments_for_output(0));
    if tx.outputs.first().map(|o| &o.script_pubkey) != Some(&p2sh_output_script(&redeem)) {
      return Err(not_agreed("la salida no paga a la clave del receptor con los compromisos esperados"));
    }
    let unlock = tx.inputs[0].script_sig.chunks()?;
    let sender_redeem = match unlock.as_slice() {
      [_, redeem] => redeem.data().map(|d| chain_domain::Script::new(d.to_vec())),
      _ => None,
    };
    match sender_redeem {
      Some(r) if p2sh_output_script(&r) == connected.script_pubkey => {}
      _ => return Err(not_agreed("el redeem script del input no corresponde a la salida gastada")),
    }

    let signature = offchain::sign(&tx, &receiver_key, &self.signer())?;
    state.graph_mut(id)?.require_mut(step_id)?.handover = received;
    self.persist(&state)?;
    debug!("plantilla de {} aceptada en {}", from, id);
    Ok(signature)
  }

  /// Comprueba si el emisor ya publicó el traspaso. Si lo hizo, reconstruye
  /// la transacción con el script publicado y la firma propia, exige que el
  /// hash coincida y libera el cerrojo.
  pub async fn finish_handover_template_on_receiver_side(&self,
                                                         guard: NegotiationGuard,
                                                         id: WorkflowInstance,
                                                         from: &Identity)
                                                         -> Result<ReceiverFinish> {
    debug!("finish_handover_template_on_receiver_side({}, {})", id, from);
    self.check_lock(&guard)?;
    let mut state = self.state.lock().await;
    let step_id = checks::leaf_template_from(state.graph(id)?, &self.own, from)?;
    let template = state.graph(id)?.require(step_id)?.handover.clone();
    let reference = template.reference()
                            .ok_or_else(|| WorkflowError::WorkflowStateViolation(format!("la plantilla {} aún no fue confirmada", step_id)))?;
    let outpoint = reference.outpoint_of_input(0)
                            .ok_or_else(|| WorkflowError::WorkflowStateViolation("la plantilla no tiene inputs".to_string()))?;
    let published = match self.explorer.spender_of_outpoint(&outpoint).await? {
      Some(p) => p,
      None => {
        debug!("el traspaso de {} en {} aún no está publicado", from, id);
        return Ok(ReceiverFinish::Pending(guard));
      }
    };
    let unlock = published.inputs
                          .first()
                          .map(|i| i.script.clone())
                          .ok_or_else(|| WorkflowError::ReconciliationInconsistency(format!("{} no tiene inputs", published.hash)))?;

    let own_signature = offchain::sign(&reference.transaction(), template.key_for_output(0)?, &self.signer())?;
    let mut finished = self.builder.finish_template_on_receiver_side(&template, &unlock, &own_signature)?;
    let rebuilt = finished.reference().map(|r| r.tx_hash());
    if rebuilt != Some(published.hash) {
      return Err(WorkflowError::ReconciliationInconsistency(format!("se publicó {} pero lo acordado era {:?}",
                                                                    published.hash, rebuilt)));
    }
    let published_hash = published.hash;
    if let Some(r) = finished.reference_mut() {
      r.attach_observed(published);
    }

    let graph = state.graph_mut(id)?;
    // La reconciliación pudo traer ya la transacción publicada como un
    // paso anónimo bajo el mismo padre.
    let duplicates: Vec<StepId> = graph.steps()
                                       .filter(|s| s.id != step_id && s.tx_hash() == Some(published_hash) && s.children.is_empty())
                                       .map(|s| s.id)
                                       .collect();
    for dup in duplicates {
      warn!("descartando el paso duplicado {} de {}", dup, published_hash);
      graph.detach(dup)?;
    }
    graph.require_mut(step_id)?.handover = finished;
    self.persist(&state)?;
    drop(guard);
    info!("{} recibió el traspaso de {} en {}", self.own.company_name(), from, id);
    Ok(ReceiverFinish::Finished(step_id))
  }

  /// Elimina la plantilla de recepción pendiente de `from` si es un
  /// INTERMEDIATE. Devuelve si se eliminó algo.
  pub async fn delete_intermediate_leaf_template_if_exists_on_receiver_side(&self,
                                                                            guard: &NegotiationGuard,
                                                                            id: WorkflowInstance,
                                                                            from: &Identity)
                                                                            -> Result<bool> {
    debug!("delete_intermediate_leaf_template_if_exists_on_receiver_side({}, {})", id, from);
    self.check_lock(guard)?;
    let mut state = self.state.lock().await;
    let step_id = checks::leaf_template_from(state.graph(id)?, &self.own, from)?;
    if state.graph(id)?.require(step_id)?.kind() != chain_domain::HandoverKind::Intermediate {
      return Ok(false);
    }
    state.graph_mut(id)?.detach(step_id)?;
    self.persist(&state)?;
    Ok(true)
  }
}

fn not_agreed(detail: &str) -> WorkflowError {
  WorkflowError::Validation(format!("la plantilla contiene información no acordada: {}", detail))
}
