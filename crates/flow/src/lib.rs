//! Crate `flow`: grafo de ejecución de workflows entre organizaciones
//!
//! Este crate define las identidades de las partes (`Identity`), los pasos
//! del workflow (`WorkflowGraphStep`), el grafo de una instancia
//! (`WorkflowGraph`, un DAG en arena con aristas por id), el asignador de
//! ids (`IdAllocator`) y el contrato de persistencia `GraphRepository` con
//! una implementación en memoria útil para pruebas.
//!
//! Diseño resumido:
//! - La raíz es el paso START; un END no tiene hijos; un SPLIT tiene como
//!   mucho tantos hijos como salidas con token; un JOIN tiene varios padres.
//! - Las hojas cuentan huecos: un SPLIT sin reclamar aporta un hueco por
//!   salida libre.
//! - El almacén completo se reescribe tras cada mutación.
pub mod domain;
pub mod errors;
pub mod graph;
pub mod ids;
pub mod repository;
pub mod stubs;

pub use domain::*;
pub use errors::*;
pub use graph::*;
pub use ids::*;
pub use repository::*;
pub use stubs::*;
