//! chain-workflow: gestor de traspasos de workflows sobre la cadena
//!
//! `HandoverManager` mantiene el grafo de ejecución de cada instancia que
//! conoce un participante y ejecuta las transiciones del protocolo: START,
//! traspasos negociados (plantilla, firma off-chain, publicación), SPLIT,
//! JOIN y END. La reconciliación (`ReconciliationEngine`) completa el grafo
//! local con lo que otros participantes publicaron en la cadena.
//!
//! Las colaboraciones externas llegan por traits de `chain-providers`
//! (`ChainConnection`, `Explorer`) y la persistencia por
//! `flow::GraphRepository`.

pub mod config;
pub mod errors;
pub mod manager;
pub mod negotiation;
pub mod publisher;
pub mod reconciliation;

pub use config::ManagerConfig;
pub use errors::{Result, WorkflowError};
pub use manager::{HandoverManager, HandoverTerms, ReceiverFinish};
pub use negotiation::{NegotiationGuard, NegotiationLock};
pub use publisher::Publisher;
pub use reconciliation::{Reconciled, ReconciliationEngine};
