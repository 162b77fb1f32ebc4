use chain_domain::{HandoverData, ObservedOutput, ObservedTransaction, Script, TransactionReference, TxHash, WorkflowHandoverData,
                   WorkflowInstance};
use chain_persistence::{new_from_env, DieselGraphRepository};
use flow::{GraphRepository, GraphSnapshot, IdAllocator, Identity, WorkflowGraph, WorkflowGraphStep};
use std::collections::BTreeMap;

fn observed(seed: u8) -> ObservedTransaction {
  ObservedTransaction { hash: TxHash::from_internal([seed; 32]),
                        confirmations: 3,
                        block_height: Some(7),
                        inputs: vec![],
                        outputs: vec![ObservedOutput { value: 5_000,
                                                       script: Script::default(),
                                                       addresses: vec![],
                                                       spent_by: None }] }
}

fn graph(instance: u16, first_id: u32) -> WorkflowGraph {
  let wf = WorkflowInstance(instance);
  let start = HandoverData::new(WorkflowHandoverData::start(wf, 1_700_000_000),
                                Some(TransactionReference::remote(observed(first_id as u8), vec![0])),
                                vec![],
                                vec![],
                                true,
                                false).unwrap();
  let mut g = WorkflowGraph::new(wf, WorkflowGraphStep::new(first_id, Identity::own("Org A"), Identity::own("Org A"), start));
  let whd = WorkflowHandoverData::intermediate(wf, 4, 1_700_000_100).with_workflow_data(Some(b"lote 17".to_vec()));
  let next = HandoverData::new(whd,
                               Some(TransactionReference::remote(observed(first_id as u8 + 1), vec![0])),
                               vec![],
                               vec![],
                               true,
                               false).unwrap();
  g.add_child(&[first_id],
              WorkflowGraphStep::new(first_id + 1, Identity::own("Org A"), Identity::partner("Org B"), next))
   .unwrap();
  g
}

fn snapshot(graphs: Vec<WorkflowGraph>, last: u32) -> GraphSnapshot {
  let map: BTreeMap<_, _> = graphs.into_iter().map(|g| (g.instance(), g)).collect();
  GraphSnapshot::new(IdAllocator::starting_after(last), &map)
}

#[test]
fn empty_database_loads_empty_snapshot() {
  let dir = tempfile::tempdir().unwrap();
  let repo = DieselGraphRepository::new(dir.path().join("vacio.db").to_str().unwrap()).unwrap();
  let snap = repo.load().unwrap();
  assert!(snap.graphs.is_empty());
  assert_eq!(snap.ids.peek(), 0);
}

#[test]
fn save_then_load_preserves_graphs_and_allocator() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("grafos.db");
  let repo = DieselGraphRepository::new(path.to_str().unwrap()).unwrap();
  let original = snapshot(vec![graph(3, 1), graph(8, 10)], 11);
  repo.save(&original).unwrap();
  assert_eq!(repo.count_graphs().unwrap(), 2);

  // Una segunda apertura ve lo mismo.
  let reopened = DieselGraphRepository::new(path.to_str().unwrap()).unwrap();
  let loaded = reopened.load().unwrap();
  assert_eq!(loaded, original);
  let (mut ids, graphs) = loaded.into_parts();
  assert_eq!(ids.next_id(), 12);
  let wf8 = &graphs[&WorkflowInstance(8)];
  assert_eq!(wf8.step(11).unwrap().handover.workflow_data().workflow_data(), Some(&b"lote 17"[..]));
  assert_eq!(wf8.fingerprint().unwrap(), graph(8, 10).fingerprint().unwrap());
}

#[test]
fn save_replaces_previous_content() {
  let dir = tempfile::tempdir().unwrap();
  let repo = DieselGraphRepository::new(dir.path().join("reemplazo.db").to_str().unwrap()).unwrap();
  repo.save(&snapshot(vec![graph(1, 1), graph(2, 3)], 4)).unwrap();
  repo.save(&snapshot(vec![graph(2, 3)], 9)).unwrap();
  let loaded = repo.load().unwrap();
  assert_eq!(loaded.graphs.len(), 1);
  assert_eq!(loaded.graphs[0].instance(), WorkflowInstance(2));
  assert_eq!(loaded.ids.peek(), 9);
}

#[test]
fn repository_from_env_uses_configured_url() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("env.db");
  std::env::set_var("CHAINFLOW_DB_URL", path.to_str().unwrap());
  let repo = new_from_env().unwrap();
  repo.save(&snapshot(vec![graph(5, 1)], 2)).unwrap();
  assert!(path.exists());
  assert_eq!(repo.load().unwrap().graphs.len(), 1);
}
