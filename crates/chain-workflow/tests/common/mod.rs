#![allow(dead_code)]
use chain_providers::{InMemoryLedger, InMemoryWallet};
use chain_workflow::{HandoverManager, HandoverTerms, ManagerConfig, ReceiverFinish};
use chain_domain::WorkflowInstance;
use flow::{GraphRepository, Identity, InMemoryGraphRepository, StepId};
use std::sync::Arc;
use std::time::Duration;

pub const FUNDS: u64 = 2_000_000;

/// Tiempos cortos; con `start_paused` las esperas no cuestan nada.
pub fn fast_config() -> ManagerConfig {
  ManagerConfig { wait_max_for_confirmation: Duration::from_secs(30),
                  confirmation_poll_interval: Duration::from_secs(1),
                  broadcast_settle: Duration::from_millis(10),
                  ..ManagerConfig::default() }
}

pub struct Org {
  pub name: &'static str,
  pub wallet: Arc<InMemoryWallet>,
  pub manager: HandoverManager,
}

impl Org {
  pub fn new(name: &'static str, ledger: &Arc<InMemoryLedger>) -> Self {
    Self::with_repository(name, ledger, Arc::new(InMemoryGraphRepository::new()))
  }

  pub fn with_repository(name: &'static str, ledger: &Arc<InMemoryLedger>, repository: Arc<dyn GraphRepository>) -> Self {
    let wallet = Arc::new(InMemoryWallet::new(name, name.as_bytes(), ledger.clone()));
    wallet.fund(FUNDS).unwrap();
    let manager = HandoverManager::new(Identity::own(name), wallet.clone(), ledger.clone(), repository, fast_config()).unwrap();
    Self { name, wallet, manager }
  }

  /// Cómo ven los demás a esta organización al negociar la salida
  /// `output_idx` de `step`.
  pub async fn as_sender(&self, wf: WorkflowInstance, step: StepId, output_idx: u32) -> Identity {
    let key = self.manager.bitcoin_public_key_of_step_output(wf, step, output_idx).await.unwrap();
    Identity::partner(self.name).with_bitcoin_public_key(key)
  }
}

/// Traspaso completo de `sender` a `receiver` desde la salida
/// `output_idx` de `from_step`. Devuelve los ids del paso en cada lado.
pub async fn hand_over(sender: &Org,
                       receiver: &Org,
                       wf: WorkflowInstance,
                       from_step: StepId,
                       output_idx: u32,
                       terms: HandoverTerms,
                       relax_owner_check: bool)
                       -> (StepId, StepId) {
  let sender_id = sender.as_sender(wf, from_step, output_idx).await;
  let included = sender.manager.data_included_in_step_output(wf, from_step, output_idx).await.unwrap();

  let receiver_guard = receiver.manager.acquire_lock().await;
  let receiver_key = receiver.manager
                             .init_handover_on_receiver_side(&receiver_guard, wf, &sender_id, terms.clone(), Some(included), relax_owner_check)
                             .await
                             .unwrap();
  let receiver_id = Identity::partner(receiver.name).with_bitcoin_public_key(receiver_key);

  let sender_guard = sender.manager.acquire_lock().await;
  let template = sender.manager
                       .create_handover_template(&sender_guard, wf, from_step, &receiver_id, terms, false, output_idx)
                       .await
                       .unwrap();
  let signature = receiver.manager
                          .confirm_handover_template_on_receiver_side(&receiver_guard, wf, &sender_id, &template)
                          .await
                          .unwrap();
  let sender_step = sender.manager
                          .finish_and_publish_handover_template_async(sender_guard, wf, &receiver_id, &signature, output_idx)
                          .await
                          .unwrap();
  let receiver_step = match receiver.manager
                                    .finish_handover_template_on_receiver_side(receiver_guard, wf, &sender_id)
                                    .await
                                    .unwrap()
  {
    ReceiverFinish::Finished(step) => step,
    ReceiverFinish::Pending(_) => panic!("el traspaso ya debería estar publicado"),
  };
  (sender_step, receiver_step)
}
