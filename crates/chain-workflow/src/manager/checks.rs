// Comprobaciones de estado y propiedad previas a cada transición.
use crate::errors::{Result, WorkflowError};
use chain_domain::WorkflowInstance;
use flow::{Identity, StepId, WorkflowGraph, WorkflowGraphStep};
use std::collections::BTreeMap;

fn state(msg: String) -> WorkflowError {
  WorkflowError::WorkflowStateViolation(msg)
}

pub(crate) fn workflow_exists(graphs: &BTreeMap<WorkflowInstance, WorkflowGraph>, id: WorkflowInstance) -> Result<&WorkflowGraph> {
  graphs.get(&id).ok_or_else(|| state(format!("el workflow {} no existe", id)))
}

pub(crate) fn workflow_not_exists(graphs: &BTreeMap<WorkflowInstance, WorkflowGraph>, id: WorkflowInstance) -> Result<()> {
  if graphs.contains_key(&id) {
    return Err(state(format!("el workflow {} ya existe", id)));
  }
  Ok(())
}

/// La raíz debe ser un START iniciado por `owner`.
pub(crate) fn started_by(graph: &WorkflowGraph, owner: &Identity) -> Result<()> {
  let root = graph.root()?;
  if !root.is_start() {
    return Err(state(format!("la raíz de {} no es un START", graph.instance())));
  }
  if &root.from != owner {
    return Err(WorkflowError::OwnershipViolation(format!("{} no fue iniciado por {}", graph.instance(), owner)));
  }
  Ok(())
}

pub(crate) fn single_leaf(graph: &WorkflowGraph) -> Result<StepId> {
  let leaves = graph.leaves();
  match leaves.as_slice() {
    [only] => Ok(*only),
    _ => Err(state(format!("{} tiene {} hojas y se esperaba una", graph.instance(), leaves.len()))),
  }
}

/// Una identidad desconocida en el paso actúa como comodín.
pub(crate) fn step_belongs_to(step: &WorkflowGraphStep, owner: &Identity, relaxed: bool) -> Result<()> {
  if step.to.is_unknown() {
    return Ok(());
  }
  let same = if relaxed { step.to.relaxed_eq(owner) } else { &step.to == owner };
  if !same {
    return Err(WorkflowError::OwnershipViolation(format!("el paso {} pertenece a {} y no a {}", step.id, step.to, owner)));
  }
  Ok(())
}

pub(crate) fn not_template(step: &WorkflowGraphStep) -> Result<()> {
  if step.is_template() {
    return Err(state(format!("el paso {} es una plantilla", step.id)));
  }
  Ok(())
}

pub(crate) fn not_ended(graph: &WorkflowGraph) -> Result<()> {
  if graph.contains_end() {
    return Err(state(format!("el workflow {} ya terminó", graph.instance())));
  }
  Ok(())
}

pub(crate) fn is_leaf(graph: &WorkflowGraph, id: StepId) -> Result<()> {
  graph.require(id)?;
  if !graph.is_leaf(id) {
    return Err(state(format!("el paso {} no es una hoja", id)));
  }
  Ok(())
}

/// Hoja plantilla nuestra (`to == own`) iniciada por `from`.
pub(crate) fn leaf_template_from(graph: &WorkflowGraph, own: &Identity, from: &Identity) -> Result<StepId> {
  graph.distinct_leaves()
       .into_iter()
       .filter_map(|id| graph.step(id))
       .find(|s| &s.to == own && s.is_template() && &s.from == from)
       .map(|s| s.id)
       .ok_or_else(|| state(format!("no hay una plantilla de {} pendiente en {}", from, graph.instance())))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chain_domain::{HandoverData, WorkflowHandoverData};

  fn step(id: StepId, to: Identity) -> WorkflowGraphStep {
    let whd = WorkflowHandoverData::intermediate(WorkflowInstance(1), 1, 0);
    let handover = HandoverData::new(whd, None, Vec::new(), Vec::new(), true, false).unwrap();
    WorkflowGraphStep::new(id, Identity::own("A"), to, handover)
  }

  #[test]
  fn unknown_owner_is_a_wildcard() {
    assert!(step_belongs_to(&step(1, Identity::unknown()), &Identity::own("A"), false).is_ok());
  }

  #[test]
  fn relaxed_ownership_ignores_the_bitcoin_key() {
    let key = chain_domain::KeyPair::from_seed(b"k").unwrap().public_key().clone();
    let s = step(1, Identity::partner("B").with_bitcoin_public_key(key));
    assert!(matches!(step_belongs_to(&s, &Identity::partner("B"), false), Err(WorkflowError::OwnershipViolation(_))));
    assert!(step_belongs_to(&s, &Identity::partner("B"), true).is_ok());
    assert!(step_belongs_to(&s, &Identity::partner("C"), true).is_err());
  }
}
