mod common;

use chain_domain::WorkflowInstance;
use chain_persistence::DieselGraphRepository;
use chain_providers::InMemoryLedger;
use chain_workflow::WorkflowError;
use common::Org;
use std::sync::Arc;

const WF: WorkflowInstance = WorkflowInstance(3);

#[tokio::test(start_paused = true)]
async fn lost_broadcasts_are_retried() {
  let ledger = Arc::new(InMemoryLedger::new());
  let a = Org::new("Org A", &ledger);
  ledger.drop_next_broadcasts(2);

  let start = a.manager.start_workflow_async(WF, 1, 0).await.unwrap();
  let hash = a.manager.tx_hash_of_step(WF, start).await.unwrap().unwrap();
  assert!(ledger.contains(&hash));
}

#[tokio::test(start_paused = true)]
async fn publishing_gives_up_after_the_configured_tries() {
  let ledger = Arc::new(InMemoryLedger::new());
  let a = Org::new("Org A", &ledger);
  ledger.drop_next_broadcasts(100);

  let result = a.manager.start_workflow_async(WF, 1, 0).await;
  assert!(matches!(result, Err(WorkflowError::ConfirmationTimeout(_))));
  // El paso quedó guardado y se puede republicar más tarde.
  assert!(a.manager.workflow_exists(WF).await);
  ledger.drop_next_broadcasts(0);
  assert_eq!(a.manager.republish_all_owned_handovers().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn confirmation_wait_times_out_without_blocks() {
  let ledger = Arc::new(InMemoryLedger::new().with_auto_mine(false));
  let a = Org::new("Org A", &ledger);

  let start = a.manager.start_workflow_async(WF, 1, 0).await.unwrap();
  let waited = a.manager.wait_for_confirmation_on_handover(WF, start).await;
  assert!(matches!(waited, Err(WorkflowError::ConfirmationTimeout(_))));

  ledger.mine_block();
  a.manager.wait_for_confirmation_on_handover(WF, start).await.unwrap();
  a.manager.wait_for_confirmation_on_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn store_survives_a_restart() {
  let dir = tempfile::tempdir().unwrap();
  let url = dir.path().join("org-a.db");
  let url = url.to_str().unwrap();
  let ledger = Arc::new(InMemoryLedger::new());

  let start = {
    let repository = Arc::new(DieselGraphRepository::new(url).unwrap());
    let a = Org::with_repository("Org A", &ledger, repository);
    a.manager.start_workflow(WF, 1, 0).await.unwrap()
  };

  let repository = Arc::new(DieselGraphRepository::new(url).unwrap());
  let a = Org::with_repository("Org A", &ledger, repository);
  assert!(a.manager.workflow_exists(WF).await);
  assert!(a.manager.tx_hash_of_step(WF, start).await.unwrap().is_some());
  assert!(!a.manager.workflow_was_ended(WF).await.unwrap());
}
