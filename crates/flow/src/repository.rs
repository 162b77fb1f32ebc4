// Archivo: repository.rs
// Propósito: definir el trait `GraphRepository`, el contrato que deben
// implementar las persistencias del almacén de grafos (fichero, memoria...).
use crate::graph::WorkflowGraph;
use crate::ids::IdAllocator;
use crate::errors::Result;
use chain_domain::WorkflowInstance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Estado completo del almacén de un participante: todos sus grafos y el
/// asignador de ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
  pub ids: IdAllocator,
  pub graphs: Vec<WorkflowGraph>,
}

impl GraphSnapshot {
  pub fn new(ids: IdAllocator, graphs: &BTreeMap<WorkflowInstance, WorkflowGraph>) -> Self {
    Self { ids, graphs: graphs.values().cloned().collect() }
  }

  /// Devuelve el mapa por instancia y un asignador que no colisiona con
  /// ningún id ya persistido.
  pub fn into_parts(self) -> (IdAllocator, BTreeMap<WorkflowInstance, WorkflowGraph>) {
    let mut ids = self.ids;
    let mut graphs = BTreeMap::new();
    for g in self.graphs {
      ids.advance_past(g.max_id());
      graphs.insert(g.instance(), g);
    }
    (ids, graphs)
  }
}

/// Contrato de persistencia del almacén de grafos.
///
/// El almacén se reescribe completo después de cada mutación; las
/// implementaciones deben hacer `save` de forma atómica.
pub trait GraphRepository: Send + Sync {
  /// Carga el último estado guardado (vacío si no hay ninguno).
  fn load(&self) -> Result<GraphSnapshot>;

  /// Reemplaza el estado guardado.
  fn save(&self, snapshot: &GraphSnapshot) -> Result<()>;
}
