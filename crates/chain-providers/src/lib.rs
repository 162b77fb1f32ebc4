//! Crate `chain-providers`: colaboradores externos del gestor de workflows
//!
//! - `ChainConnection`: billetera + red (claves, fondos, difusión).
//! - `Explorer`: vista pública de la cadena (transacciones, gastadores,
//!   índice por dirección).
//! - `InMemoryLedger` / `InMemoryWallet`: implementaciones en memoria para
//!   pruebas y demos; varias billeteras comparten un mismo ledger.
mod errors;
pub mod ledger;
pub mod traits;
pub mod wallet;

pub use errors::{ProviderError, Result};
pub use ledger::InMemoryLedger;
pub use traits::{BroadcastOutcome, ChainConnection, Explorer};
pub use wallet::InMemoryWallet;
