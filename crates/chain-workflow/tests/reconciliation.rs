mod common;

use chain_domain::data_block;
use chain_domain::script::{data_carrier_script, p2sh_output_script, redeem_script};
use chain_domain::{HandoverData, KeyPair, LocalTransaction, OutPoint, ShapeBuilder, Transaction, TransactionReference, TxIn,
                   TxOut, WorkflowHandoverData, WorkflowInstance};
use chain_providers::InMemoryLedger;
use chain_workflow::{HandoverTerms, Reconciled, ReconciliationEngine, WorkflowError};
use common::{hand_over, Org};
use flow::{IdAllocator, Identity, StepId, WorkflowGraph, WorkflowGraphStep};
use std::sync::Arc;

const WF: WorkflowInstance = WorkflowInstance(11);

async fn reconcile(ledger: &InMemoryLedger, graph: WorkflowGraph) -> chain_workflow::Result<Reconciled> {
  let mut ids = IdAllocator::starting_after(graph.max_id());
  ReconciliationEngine::new(ledger, &mut ids).reconcile(graph).await
}

fn inconsistency(result: chain_workflow::Result<Reconciled>) -> String {
  match result {
    Err(WorkflowError::ReconciliationInconsistency(msg)) => msg,
    Err(other) => panic!("se esperaba una inconsistencia y llegó: {}", other),
    Ok(r) => panic!("la reconciliación no falló: {:?}", r.graph.bfs()),
  }
}

/// Grafo del emisor con START publicado y una plantilla de traspaso
/// colgando de él. Devuelve (ledger, grafo, start, plantilla).
async fn pending_template() -> (Arc<InMemoryLedger>, WorkflowGraph, StepId, StepId) {
  let ledger = Arc::new(InMemoryLedger::new());
  let a = Org::new("Org A", &ledger);
  let start = a.manager.start_workflow(WF, 2, 0).await.unwrap();
  let key = KeyPair::from_seed(b"Org B").unwrap().public_key().clone();
  let to = Identity::partner("Org B").with_bitcoin_public_key(key);
  let guard = a.manager.acquire_lock().await;
  a.manager
   .create_handover_template(&guard, WF, start, &to, HandoverTerms::new(500, 4, None), false, 0)
   .await
   .unwrap();
  drop(guard);
  let graph = a.manager.workflow_instance_as_clone(WF).await.unwrap();
  let template = graph.steps().find(|s| s.is_template()).map(|s| s.id).unwrap();
  (ledger, graph, start, template)
}

/// Copia de la plantilla como paso no plantilla con una transacción
/// distinta que nadie publicó.
fn unpublished_copy(graph: &WorkflowGraph, template: StepId, id: StepId) -> WorkflowGraphStep {
  let step = graph.step(template).unwrap();
  let local = step.handover.reference().unwrap().local_transaction().unwrap().clone();
  let mut tx = local.transaction.clone();
  tx.lock_time = 1;
  let reference = TransactionReference::local(LocalTransaction::new(tx, local.connected_outputs), vec![0]);
  let handover = step.handover.clone_with_reference(reference, false).unwrap();
  WorkflowGraphStep::new(id, step.from.clone(), step.to.clone(), handover)
}

#[tokio::test(start_paused = true)]
async fn template_with_children_is_rejected() {
  let (ledger, mut graph, _, template) = pending_template().await;
  let child = unpublished_copy(&graph, template, graph.max_id() + 1);
  graph.add_child(&[template], child).unwrap();
  let msg = inconsistency(reconcile(&ledger, graph).await);
  assert!(msg.contains("tiene hijos"), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn template_as_root_is_rejected() {
  let (ledger, graph, _, template) = pending_template().await;
  let alone = WorkflowGraph::new(WF, graph.step(template).unwrap().clone());
  let msg = inconsistency(reconcile(&ledger, alone).await);
  assert!(msg.contains("es una plantilla"), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn template_parent_without_transaction_is_rejected() {
  let (ledger, mut graph, start, _) = pending_template().await;
  let whd = graph.step(start).unwrap().handover.workflow_data().clone();
  graph.require_mut(start).unwrap().handover = HandoverData::new(whd, None, vec![], vec![], true, false).unwrap();
  let msg = inconsistency(reconcile(&ledger, graph).await);
  assert!(msg.contains("no tiene transacción"), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn template_whose_parent_is_unreachable_is_rejected() {
  let (ledger, mut graph, start, template) = pending_template().await;
  // La plantilla cuelga de un paso que el START no lista como hijo.
  let orphan = graph.max_id() + 1;
  graph.insert(unpublished_copy(&graph, template, orphan).with_parents(vec![start])).unwrap();
  graph.set_children(orphan, vec![template]).unwrap();
  graph.require_mut(template).unwrap().parents = vec![orphan];
  graph.set_children(start, vec![]).unwrap();

  let msg = inconsistency(reconcile(&ledger, graph).await);
  assert!(msg.contains("no se encontró el padre"), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn known_transaction_that_disappears_is_rejected() {
  let (ledger, mut graph, _, template) = pending_template().await;
  let loose = unpublished_copy(&graph, template, graph.max_id() + 1);
  let hash = loose.tx_hash().unwrap();
  graph.insert(loose).unwrap();

  let msg = inconsistency(reconcile(&ledger, graph).await);
  assert!(msg.contains("desapareció"), "{}", msg);
  assert!(msg.contains(&hash.to_string()), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn walking_back_into_an_end_is_rejected() {
  let ledger = Arc::new(InMemoryLedger::new());
  let a = Org::new("Org A", &ledger);
  a.manager.start_workflow(WF, 1, 0).await.unwrap();
  let end = a.manager.end_workflow(WF, false, false).await.unwrap();
  let end_hash = a.manager.tx_hash_of_step(WF, end).await.unwrap().unwrap();

  // Un INTERMEDIATE local que pretende gastar la salida del END.
  let whd = WorkflowHandoverData::intermediate(WF, 2, 900);
  let mut tx = Transaction::new();
  tx.inputs.push(TxIn::new(OutPoint { txid: end_hash, vout: 0 }));
  tx.outputs.push(TxOut { value: 1_000, script_pubkey: p2sh_output_script(&redeem_script(&[3u8; 20], &[])) });
  tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&data_block::encode(&whd, None).unwrap()).unwrap() });
  let reference = TransactionReference::local(LocalTransaction::new(tx, vec![]), vec![0]);
  let handover = HandoverData::new(whd, Some(reference), vec![], vec![], true, false).unwrap();
  let graph = WorkflowGraph::new(WF, WorkflowGraphStep::new(1, Identity::own("Org A"), Identity::partner("Org B"), handover));

  let msg = inconsistency(reconcile(&ledger, graph).await);
  assert!(msg.contains("se llegó a un END"), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn start_listed_as_child_is_rejected() {
  let ledger = InMemoryLedger::new();
  let builder = ShapeBuilder::default();
  let key = KeyPair::from_seed(b"inicio").unwrap().public_key().clone();
  let unpublished_start = |timestamp: u32| {
    let whd = WorkflowHandoverData::start(WF, timestamp);
    let tx = builder.start_skeleton(&whd, &key, 50_000).unwrap();
    builder.start_handover(&whd, &key, LocalTransaction::new(tx, vec![]), 50_000).unwrap()
  };
  let me = Identity::own("Org A");
  let mut graph = WorkflowGraph::new(WF, WorkflowGraphStep::new(1, me.clone(), me.clone(), unpublished_start(1)));
  graph.add_child(&[1], WorkflowGraphStep::new(2, me.clone(), me, unpublished_start(2))).unwrap();

  let msg = inconsistency(reconcile(&ledger, graph).await);
  assert!(msg.contains("START como hijo"), "{}", msg);
}

#[tokio::test(start_paused = true)]
async fn stale_edges_after_split_and_handover_are_rederived() {
  let ledger = Arc::new(InMemoryLedger::new());
  let a = Org::new("Org A", &ledger);
  let b = Org::new("Org B", &ledger);
  let start = a.manager.start_workflow(WF, 4, 1).await.unwrap();
  let split = a.manager.split_workflow(WF, start, 0, 2).await.unwrap();
  let (sent, _) = hand_over(&a, &b, WF, split, 0, HandoverTerms::new(700, 5, Some(b"rama 0".to_vec())), true).await;

  let mut graph = a.manager.workflow_instance_as_clone(WF).await.unwrap();
  let sent_hash = graph.step(sent).unwrap().tx_hash().unwrap();
  graph.set_children(split, vec![]).unwrap();
  graph.require_mut(sent).unwrap().parents.clear();

  let reconciled = reconcile(&ledger, graph).await.unwrap();
  assert!(reconciled.changed);
  let graph = reconciled.graph;
  let split_step = graph.step(split).unwrap();
  assert_eq!(split_step.children, vec![sent]);
  assert_eq!(graph.step(sent).unwrap().tx_hash(), Some(sent_hash));
  assert_eq!(graph.step(sent).unwrap().parents, vec![split]);
  assert_eq!(graph.bfs(), vec![start, split, sent]);
}
