//! Crate `chain-domain`: núcleo del protocolo de traspaso de workflows
//!
//! Define el codec del bloque de datos de 80 bytes, los scripts (redeem
//! scripts de compromiso + bloqueo por clave envueltos en P2SH), un modelo
//! mínimo de transacción legacy, el constructor de las cinco formas de
//! transacción (START, INTERMEDIATE, SPLIT, JOIN, END), el clasificador
//! estructural y el procesador de firmas off-chain.
//!
//! Todo es síncrono y sin E/S: la billetera, la red y el explorador se
//! modelan en `chain-providers`.
//!
//! Ejemplo rápido:
//! ```rust
//! use chain_domain::{data_block, WorkflowHandoverData, WorkflowInstance};
//! let whd = WorkflowHandoverData::intermediate(WorkflowInstance(7), 2, 1_700_000_000);
//! let payload = data_block::encode(&whd, None).unwrap();
//! assert_eq!(payload.len(), 80);
//! assert_eq!(data_block::decode(&payload).unwrap().task_id, 2);
//! ```
pub mod builder;
pub mod classifier;
pub mod data_block;
mod errors;
pub mod handover;
pub mod hashing;
pub mod keys;
pub mod offchain;
pub mod reference;
pub mod script;
mod serde_hex;
pub mod token_size;
pub mod transaction;
pub mod workflow;

pub use builder::{distribute_equally, ShapeBuilder, SpendableToken, DEFAULT_FEE_PER_KB, SIG_SIZE};
pub use data_block::DataBlock;
pub use errors::DomainError;
pub use handover::HandoverData;
pub use keys::{KeyPair, PublicKey, TransactionSigner};
pub use reference::{LocalTransaction, ObservedInput, ObservedOutput, ObservedTransaction, TransactionReference, TxSource};
pub use script::{Address, Script};
pub use token_size::estimate_token_size;
pub use transaction::{OutPoint, Transaction, TxHash, TxIn, TxOut};
pub use workflow::{HandoverKind, WorkflowHandoverData, WorkflowInstance};
