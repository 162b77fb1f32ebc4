use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use chain_domain::WorkflowInstance;
use chain_providers::{InMemoryLedger, InMemoryWallet};
use chain_workflow::{HandoverManager, HandoverTerms, ManagerConfig, ReceiverFinish};
use flow::{GraphRepository, Identity, InMemoryGraphRepository, StepId};
use log::info;

const FUNDS: u64 = 2_000_000;

/// Una organización de la demo con su gestor de traspasos.
struct Org {
    name: &'static str,
    manager: HandoverManager,
}

impl Org {
    fn new(name: &'static str,
           ledger: &Arc<InMemoryLedger>,
           repository: Arc<dyn GraphRepository>,
           config: ManagerConfig)
           -> Result<Self, Box<dyn Error>> {
        let wallet = Arc::new(InMemoryWallet::new(name, name.as_bytes(), ledger.clone()));
        wallet.fund(FUNDS)?;
        let manager = HandoverManager::new(Identity::own(name), wallet.clone(), ledger.clone(), repository, config)?;
        Ok(Self { name, manager })
    }
}

/// Estado de la sesión: dos organizaciones sobre la misma cadena en
/// memoria y la posición actual del token en cada lado.
struct Demo {
    ledger: Arc<InMemoryLedger>,
    sender: Org,
    receiver: Org,
    workflow: Option<WorkflowInstance>,
    sender_step: Option<StepId>,
    receiver_step: Option<StepId>,
}

impl Demo {
    fn new(config: ManagerConfig, sender_repository: Arc<dyn GraphRepository>) -> Result<Self, Box<dyn Error>> {
        let ledger = Arc::new(InMemoryLedger::new());
        let sender = Org::new("Org A", &ledger, sender_repository, config.clone())?;
        let receiver = Org::new("Org B", &ledger, Arc::new(InMemoryGraphRepository::new()), config)?;
        Ok(Self { ledger, sender, receiver, workflow: None, sender_step: None, receiver_step: None })
    }

    async fn start(&mut self) -> Result<WorkflowInstance, Box<dyn Error>> {
        let wf = self.sender.manager.unused_instance_id().await?;
        let step = self.sender.manager.start_workflow_async(wf, 3, 0).await?;
        self.workflow = Some(wf);
        self.sender_step = Some(step);
        self.receiver_step = None;
        Ok(wf)
    }

    /// Negociación completa de A hacia B desde la salida 0 del paso actual.
    async fn hand_over(&mut self, task_id: u8, data: Option<Vec<u8>>) -> Result<StepId, Box<dyn Error>> {
        let wf = self.workflow.ok_or("no hay workflow activo")?;
        let from = self.sender_step.ok_or("la organización A no tiene el token")?;
        let terms = HandoverTerms::new(now(), task_id, data);

        let key = self.sender.manager.bitcoin_public_key_of_step_output(wf, from, 0).await?;
        let sender_id = Identity::partner(self.sender.name).with_bitcoin_public_key(key);
        let included = self.sender.manager.data_included_in_step_output(wf, from, 0).await?;

        let receiver_guard = self.receiver.manager.acquire_lock().await;
        let receiver_key = self.receiver
                               .manager
                               .init_handover_on_receiver_side(&receiver_guard, wf, &sender_id, terms.clone(), Some(included), false)
                               .await?;
        let receiver_id = Identity::partner(self.receiver.name).with_bitcoin_public_key(receiver_key);

        let sender_guard = self.sender.manager.acquire_lock().await;
        let template = match self.sender
                                 .manager
                                 .create_handover_template(&sender_guard, wf, from, &receiver_id, terms, false, 0)
                                 .await
        {
            Ok(t) => t,
            Err(e) => {
                self.receiver.manager.abort_handover(Some(receiver_guard), wf).await;
                return Err(e.into());
            }
        };
        let signature = match self.receiver
                                  .manager
                                  .confirm_handover_template_on_receiver_side(&receiver_guard, wf, &sender_id, &template)
                                  .await
        {
            Ok(s) => s,
            Err(e) => {
                self.sender.manager.abort_handover(Some(sender_guard), wf).await;
                self.receiver.manager.abort_handover(Some(receiver_guard), wf).await;
                return Err(e.into());
            }
        };
        self.sender
            .manager
            .finish_and_publish_handover_template_async(sender_guard, wf, &receiver_id, &signature, 0)
            .await?;
        let step = match self.receiver
                             .manager
                             .finish_handover_template_on_receiver_side(receiver_guard, wf, &sender_id)
                             .await?
        {
            ReceiverFinish::Finished(step) => step,
            ReceiverFinish::Pending(_) => return Err("el traspaso aún no es visible en la cadena".into()),
        };
        self.sender_step = None;
        self.receiver_step = Some(step);
        Ok(step)
    }

    async fn end(&mut self) -> Result<StepId, Box<dyn Error>> {
        let wf = self.workflow.ok_or("no hay workflow activo")?;
        if self.receiver_step.is_none() {
            return Err("la organización B no tiene el token".into());
        }
        let step = self.receiver.manager.end_workflow_async(wf, false, false).await?;
        self.receiver_step = None;
        Ok(step)
    }

    async fn print(&self) {
        println!("\n-- {} --", self.sender.name);
        self.sender.manager.print_all_workflow_information(true).await;
        println!("-- {} --", self.receiver.name);
        self.receiver.manager.print_all_workflow_information(true).await;
        if let Some(wf) = self.workflow {
            for org in [&self.sender, &self.receiver] {
                if let Some(lines) = org.manager.describe_workflow_instance(wf, false).await {
                    println!("{} ve {}:", org.name, wf);
                    for line in lines {
                        println!("  {}", line);
                    }
                }
            }
        }
        println!("Altura de la cadena: {}", self.ledger.height());
        println!("Saldo A: {} | Saldo B: {}",
                 self.sender.manager.balance().await.unwrap_or(0),
                 self.receiver.manager.balance().await.unwrap_or(0));
    }
}

fn now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(feature = "sqlite_demo")]
fn sender_repository() -> Result<Arc<dyn GraphRepository>, Box<dyn Error>> {
    Ok(Arc::new(chain_persistence::new_from_env()?))
}

#[cfg(not(feature = "sqlite_demo"))]
fn sender_repository() -> Result<Arc<dyn GraphRepository>, Box<dyn Error>> {
    Ok(Arc::new(InMemoryGraphRepository::new()))
}

/// Menú interactivo para recorrer un workflow START → INTERMEDIATE → END
/// entre dos organizaciones sobre una cadena en memoria.
///
/// Opciones soportadas:
/// 1) Iniciar workflow en A
/// 2) Traspasar el token de A a B
/// 3) Terminar el workflow en B
/// 4) Ver información guardada
/// 5) Minar un bloque
/// 6) Salir
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
                             .init();

    let config = ManagerConfig::from_env()?;
    info!("configuración: {}", serde_json::to_string(&config)?);
    let mut demo = Demo::new(config, sender_repository()?)?;

    loop {
        println!("\n== Chainflow demo ==");
        println!("1) Iniciar workflow (Org A)");
        println!("2) Traspasar token de Org A a Org B");
        println!("3) Terminar workflow (Org B)");
        println!("4) Ver información guardada");
        println!("5) Minar un bloque");
        println!("6) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => match demo.start().await {
                Ok(wf) => println!("Workflow iniciado: {}", wf),
                Err(e) => eprintln!("Error iniciando workflow: {}", e),
            },
            "2" => {
                let task = prompt("Id de la tarea siguiente (0-255): ")?;
                let task_id: u8 = match task.trim().parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Id de tarea inválido");
                        continue;
                    }
                };
                let payload = prompt("Payload (enter para ninguno): ")?;
                let data = if payload.trim().is_empty() { None } else { Some(payload.trim().as_bytes().to_vec()) };
                match demo.hand_over(task_id, data).await {
                    Ok(step) => println!("Traspaso completado, paso de B: {}", step),
                    Err(e) => eprintln!("Error en el traspaso: {}", e),
                }
            }
            "3" => match demo.end().await {
                Ok(step) => println!("Workflow terminado en el paso {}", step),
                Err(e) => eprintln!("Error terminando workflow: {}", e),
            },
            "4" => demo.print().await,
            "5" => println!("Bloque minado, altura {}", demo.ledger.mine_block()),
            "6" => {
                println!("Saliendo...");
                break;
            }
            other => println!("Opción inválida: {}", other),
        }
    }

    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
