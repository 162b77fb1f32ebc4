// Archivo: reconciliation.rs
// Propósito: reconciliar el grafo local de una instancia con la vista
// pública de la cadena. Descubre los pasos que dieron otros participantes,
// re-deriva aristas obsoletas y propaga identidades entre pasos vecinos.
//
// El grafo se reconstruye sobre un "pool" de pasos indexado por id: los
// pasos ya conocidos más los que se van trayendo del explorador. Al final
// sólo sobrevive lo alcanzable desde el START.
use crate::errors::{Result, WorkflowError};
use chain_domain::classifier::{classify_reference, token_outputs_for};
use chain_domain::{Address, HandoverData, TransactionReference, TxHash, WorkflowInstance};
use chain_providers::Explorer;
use flow::{IdAllocator, Identity, StepId, WorkflowGraph, WorkflowGraphStep};
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};

/// Grafo reconciliado y si algo cambió respecto al de entrada.
#[derive(Debug, Clone)]
pub struct Reconciled {
  pub graph: WorkflowGraph,
  pub changed: bool,
}

pub struct ReconciliationEngine<'a> {
  explorer: &'a dyn Explorer,
  ids: &'a mut IdAllocator,
  pool: IndexMap<StepId, WorkflowGraphStep>,
  changed: bool,
}

fn inconsistency(msg: impl Into<String>) -> WorkflowError {
  WorkflowError::ReconciliationInconsistency(msg.into())
}

impl<'a> ReconciliationEngine<'a> {
  pub fn new(explorer: &'a dyn Explorer, ids: &'a mut IdAllocator) -> Self {
    Self { explorer, ids, pool: IndexMap::new(), changed: false }
  }

  /// Reconstruye un grafo que aún no existe localmente a partir de la
  /// primera transacción que pagó a `address`.
  pub async fn discover(mut self, instance: WorkflowInstance, address: &Address) -> Result<Reconciled> {
    let hashes = self.explorer.tx_hashes_of_address(address).await?;
    let first = hashes.first()
                      .copied()
                      .ok_or_else(|| WorkflowError::WorkflowStateViolation(format!("ninguna transacción paga a {}", address)))?;
    debug!("descubriendo {} a partir de {}", instance, first);
    let id = self.fetch_online(&first)
                 .await?
                 .ok_or_else(|| inconsistency(format!("{} no es una transacción de workflow", first)))?;
    let step = self.take(id)?;
    if step.handover.workflow_data().instance() != instance {
      return Err(WorkflowError::Validation(format!("{} pertenece a {} y no a {}",
                                                   first,
                                                   step.handover.workflow_data().instance(),
                                                   instance)));
    }
    let graph = WorkflowGraph::new(instance, step);
    let mut reconciled = self.reconcile(graph).await?;
    reconciled.changed = true;
    Ok(reconciled)
  }

  pub async fn reconcile(mut self, graph: WorkflowGraph) -> Result<Reconciled> {
    let instance = graph.instance();
    let known: Vec<TxHash> = graph.steps()
                                  .filter(|s| !s.is_template())
                                  .filter_map(|s| s.tx_hash())
                                  .collect();

    // Las plantillas se apartan y se vuelven a colgar al final.
    let mut templates = Vec::new();
    for step in graph.steps().filter(|s| s.is_template()) {
      if !step.children.is_empty() {
        return Err(inconsistency(format!("la plantilla {} tiene hijos", step.id)));
      }
      if step.id == graph.root_id() {
        return Err(inconsistency(format!("la raíz de {} es una plantilla", instance)));
      }
      self.ids.advance_past(step.id);
      let mut parent_hashes = Vec::new();
      for p in &step.parents {
        let hash = graph.step(*p)
                        .and_then(|s| s.tx_hash())
                        .ok_or_else(|| inconsistency(format!("el padre {} de la plantilla {} no tiene transacción", p, step.id)))?;
        parent_hashes.push(hash);
      }
      templates.push((step.clone(), parent_hashes));
    }
    let template_ids: HashSet<StepId> = templates.iter().map(|(s, _)| s.id).collect();
    for step in graph.steps().filter(|s| !s.is_template()) {
      let mut step = step.clone();
      step.children.retain(|c| !template_ids.contains(c));
      self.pool.insert(step.id, step);
    }

    let mut root = graph.root_id();
    if !self.pool.get(&root).map(|s| s.is_start()).unwrap_or(false) {
      root = self.find_start().await?;
      self.changed = true;
    }
    self.walk(root).await?;
    let mut rebuilt = self.assemble(instance, root)?;

    for (step, parent_hashes) in templates {
      let mut parents = Vec::new();
      for hash in &parent_hashes {
        let parent = rebuilt.steps()
                            .find(|s| !s.is_template() && s.tx_hash().as_ref() == Some(hash))
                            .map(|s| s.id)
                            .ok_or_else(|| inconsistency(format!("no se encontró el padre {} de la plantilla {}", hash, step.id)))?;
        parents.push(parent);
      }
      rebuilt.add_child(&parents, step)?;
    }

    for hash in known {
      if !rebuilt.steps().any(|s| !s.is_template() && s.tx_hash() == Some(hash)) {
        return Err(inconsistency(format!("el paso con transacción {} desapareció", hash)));
      }
    }
    debug!("reconciliación de {} terminada (cambios: {})", instance, self.changed);
    Ok(Reconciled { graph: rebuilt, changed: self.changed })
  }

  fn take(&mut self, id: StepId) -> Result<WorkflowGraphStep> {
    self.pool
        .shift_remove(&id)
        .ok_or_else(|| inconsistency(format!("paso {} ausente", id)))
  }

  fn get(&self, id: StepId) -> Result<&WorkflowGraphStep> {
    self.pool.get(&id).ok_or_else(|| inconsistency(format!("paso {} ausente", id)))
  }

  fn get_mut(&mut self, id: StepId) -> Result<&mut WorkflowGraphStep> {
    self.pool.get_mut(&id).ok_or_else(|| inconsistency(format!("paso {} ausente", id)))
  }

  fn find_local(&self, hash: &TxHash) -> Option<StepId> {
    self.pool.values().find(|s| s.tx_hash().as_ref() == Some(hash)).map(|s| s.id)
  }

  /// Busca el paso localmente y si no lo trae del explorador.
  async fn find_or_fetch(&mut self, hash: &TxHash) -> Result<Option<StepId>> {
    match self.find_local(hash) {
      Some(id) => Ok(Some(id)),
      None => self.fetch_online(hash).await,
    }
  }

  /// Trae una transacción del explorador y la clasifica. Las que no son de
  /// workflow se ignoran.
  async fn fetch_online(&mut self, hash: &TxHash) -> Result<Option<StepId>> {
    let observed = match self.explorer.transaction(hash).await? {
      Some(o) => o,
      None => return Ok(None),
    };
    let provisional = TransactionReference::remote(observed.clone(), vec![0]);
    let (kind, block) = match classify_reference(&provisional) {
      Ok(found) => found,
      Err(e) => {
        warn!("{} no es una transacción de workflow: {}", hash, e);
        return Ok(None);
      }
    };
    let tokens = token_outputs_for(kind, &provisional.transaction());
    let reference = TransactionReference::remote(observed, tokens);
    let handover = HandoverData::new(block.to_handover_data(), Some(reference), Vec::new(), Vec::new(), false, false)?;
    let id = self.ids.next_id();
    debug!("paso {} ({}) traído del explorador como {}", hash, kind, id);
    self.pool.insert(id, WorkflowGraphStep::new(id, Identity::unknown(), Identity::unknown(), handover));
    self.changed = true;
    Ok(Some(id))
  }

  /// Actualiza la vista del explorador de un paso.
  async fn refresh(&mut self, id: StepId) -> Result<()> {
    let hash = match self.get(id)?.tx_hash() {
      Some(h) => h,
      None => return Ok(()),
    };
    let fresh = match self.explorer.transaction(&hash).await? {
      Some(f) => f,
      None => return Ok(()),
    };
    let mut updated = false;
    if let Some(reference) = self.get_mut(id)?.handover.reference_mut() {
      if reference.observed() != Some(&fresh) {
        reference.attach_observed(fresh);
        updated = true;
      }
    }
    self.changed |= updated;
    Ok(())
  }

  /// Punto de partida para caminar hacia atrás cuando la raíz no es START.
  fn search_point(&self) -> Result<StepId> {
    use chain_domain::HandoverKind::{Intermediate, Join, Split};
    let walkable = |s: &&WorkflowGraphStep| matches!(s.kind(), Intermediate | Join | Split);
    let fresh = self.pool
                    .values()
                    .filter(walkable)
                    .find(|s| s.handover.reference().map(|r| !r.needs_online_refresh()).unwrap_or(false));
    if let Some(step) = fresh.or_else(|| self.pool.values().find(walkable)) {
      return Ok(step.id);
    }
    match self.pool.values().next() {
      Some(only) if self.pool.len() == 1 && only.is_end() => Ok(only.id),
      _ => Err(inconsistency("no hay un punto desde el que buscar el START")),
    }
  }

  async fn find_start(&mut self) -> Result<StepId> {
    let mut current = self.search_point()?;
    self.refresh(current).await?;
    while !self.get(current)?.is_start() {
      let previous = self.find_previous(current).await?;
      if self.get(previous)?.is_end() {
        return Err(inconsistency(format!("se llegó a un END caminando hacia atrás desde {}", current)));
      }
      current = previous;
    }
    Ok(current)
  }

  /// Paso que produjo la salida gastada por el input 0.
  async fn find_previous(&mut self, id: StepId) -> Result<StepId> {
    let prev_of = |s: &WorkflowGraphStep| s.handover.reference().and_then(|r| r.prev_tx_hash_of_input(0));
    if prev_of(self.get(id)?).is_none() {
      self.refresh(id).await?;
    }
    let hash = prev_of(self.get(id)?).ok_or_else(|| inconsistency(format!("el paso {} no tiene inputs", id)))?;
    self.find_or_fetch(&hash)
        .await?
        .ok_or_else(|| inconsistency(format!("no se encontró el paso anterior {}", hash)))
  }

  fn parents_need_update(&self, step: &WorkflowGraphStep) -> bool {
    let reference = match step.handover.reference() {
      Some(r) => r,
      None => return false,
    };
    let inputs = reference.input_count();
    if step.parents.len() != inputs {
      return true;
    }
    (0..inputs).any(|i| match reference.prev_tx_hash_of_input(i) {
                 None => true,
                 Some(h) => !step.parents
                                 .iter()
                                 .any(|p| self.pool.get(p).and_then(|s| s.tx_hash()) == Some(h)),
               })
  }

  async fn derive_parents(&mut self, id: StepId) -> Result<Vec<StepId>> {
    let hashes: Vec<Option<TxHash>> = {
      let reference = self.get(id)?
                          .handover
                          .reference()
                          .ok_or_else(|| inconsistency(format!("el paso {} no tiene transacción", id)))?;
      (0..reference.input_count()).map(|i| reference.prev_tx_hash_of_input(i)).collect()
    };
    let mut parents = Vec::new();
    for hash in hashes {
      let hash = hash.ok_or_else(|| inconsistency(format!("input sin outpoint en el paso {}", id)))?;
      let parent = self.find_or_fetch(&hash)
                       .await?
                       .ok_or_else(|| inconsistency(format!("no se encontró el padre {} del paso {}", hash, id)))?;
      if !parents.contains(&parent) {
        parents.push(parent);
      }
    }
    Ok(parents)
  }

  fn children_need_update(&self, step: &WorkflowGraphStep) -> bool {
    let reference = match step.handover.reference() {
      Some(r) => r,
      None => return false,
    };
    let tokens = reference.token_output_indices();
    if tokens.len() != step.children.len() {
      return true;
    }
    tokens.iter().any(|i| match reference.spender_of_output(*i as usize) {
                    None => true,
                    Some(h) => !step.children
                                    .iter()
                                    .any(|c| self.pool.get(c).and_then(|s| s.tx_hash()) == Some(h)),
                  })
  }

  async fn derive_children(&mut self, id: StepId) -> Result<Vec<StepId>> {
    self.refresh(id).await?;
    let spenders: Vec<TxHash> = {
      let reference = match self.get(id)?.handover.reference() {
        Some(r) => r,
        None => return Ok(Vec::new()),
      };
      reference.token_output_indices()
               .iter()
               .filter_map(|i| reference.spender_of_output(*i as usize))
               .collect()
    };
    let mut children = Vec::new();
    for hash in spenders {
      if let Some(child) = self.find_or_fetch(&hash).await? {
        if !children.contains(&child) {
          children.push(child);
        }
      }
    }
    // Pasos propios aún no vistos por el explorador (difusión pendiente).
    let pending: Vec<StepId> = self.get(id)?
                                   .children
                                   .iter()
                                   .copied()
                                   .filter(|c| !children.contains(c))
                                   .filter(|c| {
                                     self.pool
                                         .get(c)
                                         .and_then(|s| s.handover.reference())
                                         .map(|r| r.is_local() && r.observed().is_none())
                                         .unwrap_or(false)
                                   })
                                   .collect();
    children.extend(pending);
    Ok(children)
  }

  /// Completa la identidad desconocida de uno de los dos lados.
  fn propagate(&mut self, old: StepId, new: StepId) -> Result<()> {
    let old_to = self.get(old)?.to.clone();
    let new_from = self.get(new)?.from.clone();
    if !old_to.is_unknown() && new_from.is_unknown() {
      self.get_mut(new)?.from = old_to;
      self.changed = true;
    } else if !new_from.is_unknown() && old_to.is_unknown() {
      self.get_mut(old)?.to = new_from;
      self.changed = true;
    }
    Ok(())
  }

  async fn walk(&mut self, root: StepId) -> Result<()> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
      if !visited.insert(id) {
        continue;
      }
      let step = self.get(id)?;
      if !step.is_start() && self.parents_need_update(step) {
        let parents = self.derive_parents(id).await?;
        self.get_mut(id)?.parents = parents.clone();
        self.changed = true;
        for p in parents {
          self.propagate(p, id)?;
        }
      }

      let step = self.get(id)?;
      if step.is_end() {
        if !step.children.is_empty() {
          self.get_mut(id)?.children.clear();
          self.changed = true;
        }
        continue;
      }

      if self.children_need_update(step) {
        let children = self.derive_children(id).await?;
        if self.get(id)?.children != children {
          self.get_mut(id)?.children = children.clone();
          self.changed = true;
        }
        for c in &children {
          if self.get(*c)?.is_start() {
            return Err(inconsistency(format!("el paso {} tiene un START como hijo", id)));
          }
          self.propagate(id, *c)?;
        }
      }
      queue.extend(self.get(id)?.children.iter().copied());
    }
    Ok(())
  }

  /// Grafo con los pasos alcanzables desde `root`, en orden BFS.
  fn assemble(&mut self, instance: WorkflowInstance, root: StepId) -> Result<WorkflowGraph> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
      if !seen.insert(id) {
        continue;
      }
      order.push(id);
      queue.extend(self.get(id)?.children.iter().copied());
    }
    let mut graph = WorkflowGraph::new(instance, self.take(root)?);
    for id in order.into_iter().skip(1) {
      let mut step = self.take(id)?;
      step.parents.retain(|p| seen.contains(p));
      graph.insert(step)?;
    }
    let dropped = self.pool.len();
    if dropped > 0 {
      debug!("{} pasos inalcanzables descartados en {}", dropped, instance);
    }
    Ok(graph)
  }
}
