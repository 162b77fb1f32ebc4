// Archivo: graph.rs
// Propósito: grafo de ejecución de una instancia de workflow. Los pasos se
// guardan en una arena indexada por id y las aristas son listas de ids, lo
// que permite nodos JOIN con varios padres sin referencias cíclicas.
use crate::domain::{StepId, WorkflowGraphStep};
use crate::errors::{FlowError, Result};
use chain_domain::{TxHash, WorkflowInstance};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGraph {
  instance: WorkflowInstance,
  root: StepId,
  steps: IndexMap<StepId, WorkflowGraphStep>,
}

impl WorkflowGraph {
  /// Crea el grafo con su paso raíz (sin padres).
  pub fn new(instance: WorkflowInstance, mut root: WorkflowGraphStep) -> Self {
    root.parents.clear();
    let id = root.id;
    let mut steps = IndexMap::new();
    steps.insert(id, root);
    Self { instance, root: id, steps }
  }

  pub fn instance(&self) -> WorkflowInstance {
    self.instance
  }

  pub fn root_id(&self) -> StepId {
    self.root
  }

  pub fn root(&self) -> Result<&WorkflowGraphStep> {
    self.step(self.root)
        .ok_or_else(|| FlowError::NotFound(format!("raíz {} de {}", self.root, self.instance)))
  }

  pub fn step(&self, id: StepId) -> Option<&WorkflowGraphStep> {
    self.steps.get(&id)
  }

  pub fn step_mut(&mut self, id: StepId) -> Option<&mut WorkflowGraphStep> {
    self.steps.get_mut(&id)
  }

  /// Igual que `step` pero con error `NotFound`.
  pub fn require(&self, id: StepId) -> Result<&WorkflowGraphStep> {
    self.step(id)
        .ok_or_else(|| FlowError::NotFound(format!("paso {} en {}", id, self.instance)))
  }

  pub fn require_mut(&mut self, id: StepId) -> Result<&mut WorkflowGraphStep> {
    let instance = self.instance;
    self.step_mut(id)
        .ok_or_else(|| FlowError::NotFound(format!("paso {} en {}", id, instance)))
  }

  pub fn contains(&self, id: StepId) -> bool {
    self.steps.contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Pasos en orden de inserción.
  pub fn steps(&self) -> impl Iterator<Item = &WorkflowGraphStep> {
    self.steps.values()
  }

  pub fn max_id(&self) -> StepId {
    self.steps.keys().copied().max().unwrap_or(0)
  }

  /// Inserta un paso sin tocar aristas. Lo usa la reconciliación, que
  /// reconstruye las aristas por separado.
  pub fn insert(&mut self, step: WorkflowGraphStep) -> Result<()> {
    if self.steps.contains_key(&step.id) {
      return Err(FlowError::Conflict(format!("el paso {} ya existe", step.id)));
    }
    self.steps.insert(step.id, step);
    Ok(())
  }

  /// Añade `child` como hijo de todos los `parents` (uno salvo en JOIN).
  pub fn add_child(&mut self, parents: &[StepId], mut child: WorkflowGraphStep) -> Result<StepId> {
    for p in parents {
      self.require(*p)?;
    }
    let id = child.id;
    child.parents = parents.to_vec();
    self.insert(child)?;
    for p in parents {
      if let Some(parent) = self.steps.get_mut(p) {
        if !parent.children.contains(&id) {
          parent.children.push(id);
        }
      }
    }
    Ok(id)
  }

  /// Reemplaza los hijos de `id`.
  pub fn set_children(&mut self, id: StepId, children: Vec<StepId>) -> Result<()> {
    self.require_mut(id)?.children = children;
    Ok(())
  }

  /// Elimina una hoja y la desliga de sus padres.
  pub fn detach(&mut self, id: StepId) -> Result<WorkflowGraphStep> {
    let step = self.require(id)?;
    if !step.children.is_empty() {
      return Err(FlowError::Conflict(format!("el paso {} tiene hijos", id)));
    }
    if id == self.root {
      return Err(FlowError::Conflict("no se puede eliminar la raíz".to_string()));
    }
    let parents = step.parents.clone();
    for p in parents {
      if let Some(parent) = self.steps.get_mut(&p) {
        parent.children.retain(|c| *c != id);
      }
    }
    self.steps
        .shift_remove(&id)
        .ok_or_else(|| FlowError::NotFound(format!("paso {}", id)))
  }

  /// Recorrido en anchura desde la raíz; cada paso aparece una vez.
  pub fn bfs(&self) -> Vec<StepId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut queue = VecDeque::from([self.root]);
    while let Some(id) = queue.pop_front() {
      if !seen.insert(id) {
        continue;
      }
      if let Some(step) = self.steps.get(&id) {
        out.push(id);
        queue.extend(step.children.iter().copied());
      }
    }
    out
  }

  /// Huecos donde el workflow puede continuar. Un SPLIT aparece una vez
  /// por cada salida con token aún sin hijo.
  pub fn leaves(&self) -> Vec<StepId> {
    let mut out = Vec::new();
    for id in self.bfs() {
      if let Some(step) = self.steps.get(&id) {
        out.extend(std::iter::repeat(id).take(step.leaf_slots()));
      }
    }
    out
  }

  pub fn is_leaf(&self, id: StepId) -> bool {
    self.step(id).map(|s| s.leaf_slots() > 0).unwrap_or(false)
  }

  /// Hojas distintas (sin repetir los huecos de un SPLIT).
  pub fn distinct_leaves(&self) -> Vec<StepId> {
    let mut out = self.leaves();
    out.dedup();
    out
  }

  pub fn contains_end(&self) -> bool {
    self.bfs().iter().any(|id| self.steps.get(id).map(|s| s.is_end()).unwrap_or(false))
  }

  pub fn find_by_tx_hash(&self, hash: &TxHash) -> Option<StepId> {
    self.steps
        .values()
        .find(|s| s.tx_hash().as_ref() == Some(hash))
        .map(|s| s.id)
  }

  /// Huella blake3 del grafo serializado; dos grafos iguales comparten huella.
  pub fn fingerprint(&self) -> Result<String> {
    let bytes = serde_json::to_vec(self)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
  }

  /// Una línea por paso en orden BFS:
  /// `ts : [from -> to] TIPO Task:n`, con detalles técnicos opcionales.
  pub fn describe(&self, include_technical: bool) -> Vec<String> {
    self.bfs()
        .into_iter()
        .filter_map(|id| self.steps.get(&id))
        .map(|s| {
          let whd = s.handover.workflow_data();
          let mut line = format!("{} : [{} -> {}] {} Task:{}",
                                 whd.timestamp_pretty(),
                                 s.from,
                                 s.to,
                                 whd.kind(),
                                 whd.task_id());
          if include_technical {
            let hash = s.tx_hash().map(|h| h.to_string()).unwrap_or_else(|| "-".to_string());
            line.push_str(&format!(" | id:{} Sender:{} Template:{} Tx:{}",
                                   s.id,
                                   s.handover.is_sender(),
                                   s.handover.is_template(),
                                   hash));
          }
          line
        })
        .collect()
  }
}
