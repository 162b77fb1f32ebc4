//! Persistencia del almacén de grafos sobre SQLite (Diesel + r2d2).
//! Expone el módulo `schema` y el repositorio que implementa el trait
//! `GraphRepository` del crate `flow`. Las migraciones se embeben en el
//! binario y se aplican al abrir la base.

mod graph_persistence;
pub mod schema;

pub use graph_persistence::{new_from_env, DieselGraphRepository, MIGRATIONS};
