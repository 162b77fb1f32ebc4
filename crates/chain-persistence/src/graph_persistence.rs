// Archivo: graph_persistence.rs
// Propósito: almacén de grafos sobre SQLite con Diesel. Cada instancia se
// guarda como una fila con el grafo en JSON y su huella; el asignador de
// ids ocupa una fila fija. `save` reescribe todo dentro de una transacción.
use crate::schema::id_allocator::dsl as alloc_dsl;
use crate::schema::workflow_graphs::dsl as graphs_dsl;
use crate::schema;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use flow::{FlowError, GraphRepository, GraphSnapshot, IdAllocator, Result, WorkflowGraph};
use log::{debug, info, warn};
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

// Única fila del asignador.
const ALLOCATOR_ROW: i32 = 1;

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::workflow_graphs)]
struct GraphRow {
  instance_id: i32,
  graph: String,
  fingerprint: String,
  updated_at: String,
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::id_allocator)]
struct AllocatorRow {
  id: i32,
  last_id: i64,
}

/// Repo Diesel que implementa `GraphRepository`.
pub struct DieselGraphRepository {
  pool: Arc<DbPool>,
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| FlowError::Storage(format!("db: {}", e)))
}

impl DieselGraphRepository {
  /// Abre (o crea) la base en `database_url` y aplica las migraciones
  /// pendientes.
  pub fn new(database_url: &str) -> Result<Self> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder().max_size(4)
                              .build(manager)
                              .map_err(|e| FlowError::Storage(format!("pool: {}", e)))?;
    let repo = DieselGraphRepository { pool: Arc::new(pool) };
    let mut c = repo.conn()?;
    let _ = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut c);
    let _ = diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(&mut c);
    c.run_pending_migrations(MIGRATIONS)
     .map_err(|e| FlowError::Storage(format!("migraciones: {}", e)))?;
    info!("almacén de grafos abierto en {}", database_url);
    Ok(repo)
  }

  fn conn(&self) -> Result<DbConn> {
    self.pool.get().map_err(|e| FlowError::Storage(format!("pool: {}", e)))
  }

  fn row_for(graph: &WorkflowGraph, now: &str) -> Result<GraphRow> {
    let json = serde_json::to_string(graph).map_err(|e| FlowError::Storage(format!("serializando {}: {}", graph.instance(), e)))?;
    Ok(GraphRow { instance_id: i32::from(graph.instance().id()),
                  graph: json,
                  fingerprint: graph.fingerprint()?,
                  updated_at: now.to_string() })
  }

  /// Número de instancias guardadas.
  pub fn count_graphs(&self) -> Result<i64> {
    let mut conn = self.conn()?;
    map_db_err(graphs_dsl::workflow_graphs.count().get_result(&mut conn))
  }
}

/// Construye el repositorio leyendo `CHAINFLOW_DB_URL` (tras cargar `.env`).
/// Sin la variable se usa `chainflow.db` en el directorio actual.
pub fn new_from_env() -> Result<DieselGraphRepository> {
  dotenvy::dotenv().ok();
  let url = std::env::var("CHAINFLOW_DB_URL").unwrap_or_else(|_| "chainflow.db".to_string());
  DieselGraphRepository::new(&url)
}

impl GraphRepository for DieselGraphRepository {
  fn load(&self) -> Result<GraphSnapshot> {
    let mut conn = self.conn()?;
    let rows = map_db_err(graphs_dsl::workflow_graphs.order(graphs_dsl::instance_id.asc())
                                                     .load::<GraphRow>(&mut conn))?;
    let allocator = map_db_err(alloc_dsl::id_allocator.find(ALLOCATOR_ROW)
                                                      .first::<AllocatorRow>(&mut conn)
                                                      .optional())?;
    let mut graphs = Vec::with_capacity(rows.len());
    for row in rows {
      let graph: WorkflowGraph = serde_json::from_str(&row.graph)
        .map_err(|e| FlowError::Storage(format!("grafo {} corrupto: {}", row.instance_id, e)))?;
      if graph.fingerprint()? != row.fingerprint {
        warn!("la huella guardada de WF#{} no coincide con su contenido", row.instance_id);
      }
      graphs.push(graph);
    }
    let last = allocator.map(|a| a.last_id).unwrap_or(0);
    let last = u32::try_from(last).map_err(|_| FlowError::Storage(format!("último id fuera de rango: {}", last)))?;
    debug!("cargados {} grafos (último id {})", graphs.len(), last);
    Ok(GraphSnapshot { ids: IdAllocator::starting_after(last), graphs })
  }

  fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let rows = snapshot.graphs
                       .iter()
                       .map(|g| Self::row_for(g, &now))
                       .collect::<Result<Vec<_>>>()?;
    let allocator = AllocatorRow { id: ALLOCATOR_ROW, last_id: i64::from(snapshot.ids.peek()) };
    let mut conn = self.conn()?;
    map_db_err(conn.transaction::<_, DieselError, _>(|conn| {
                     diesel::delete(graphs_dsl::workflow_graphs).execute(conn)?;
                     for row in &rows {
                       diesel::insert_into(graphs_dsl::workflow_graphs).values(row).execute(conn)?;
                     }
                     diesel::replace_into(alloc_dsl::id_allocator).values(&allocator).execute(conn)?;
                     Ok(())
                   }))?;
    debug!("guardados {} grafos", rows.len());
    Ok(())
  }
}
