use chain_domain::{HandoverData, HandoverKind, ObservedOutput, ObservedTransaction, Script, TransactionReference, TxHash,
                   WorkflowHandoverData, WorkflowInstance};
use flow::{GraphRepository, GraphSnapshot, IdAllocator, Identity, InMemoryGraphRepository, WorkflowGraph, WorkflowGraphStep};
use std::collections::BTreeMap;

const WF: WorkflowInstance = WorkflowInstance(9);

fn observed(seed: u8, outputs: usize) -> ObservedTransaction {
  ObservedTransaction { hash: TxHash::from_internal([seed; 32]),
                        confirmations: 1,
                        block_height: Some(1),
                        inputs: vec![],
                        outputs: (0..outputs).map(|_| ObservedOutput { value: 1,
                                                                       script: Script::default(),
                                                                       addresses: vec![],
                                                                       spent_by: None })
                                             .collect() }
}

fn step(id: u32, kind: HandoverKind, outputs: usize) -> WorkflowGraphStep {
  let whd = WorkflowHandoverData::new(WF, 0, kind, 100 + id);
  let tokens: Vec<u32> = match kind {
    HandoverKind::Split => (0..outputs as u32 - 1).collect(),
    HandoverKind::End => vec![],
    _ => vec![0],
  };
  let reference = TransactionReference::remote(observed(id as u8, outputs), tokens);
  let handover = HandoverData::new(whd, Some(reference), vec![], vec![], false, false).unwrap();
  WorkflowGraphStep::new(id, Identity::unknown(), Identity::unknown(), handover)
}

#[test]
fn split_slots_count_as_leaves_until_claimed() {
  let mut g = WorkflowGraph::new(WF, step(1, HandoverKind::Start, 2));
  g.add_child(&[1], step(2, HandoverKind::Split, 4)).unwrap();
  assert_eq!(g.leaves(), vec![2, 2, 2]);
  g.add_child(&[2], step(3, HandoverKind::Intermediate, 2)).unwrap();
  assert_eq!(g.leaves(), vec![2, 2, 3]);
  g.add_child(&[2], step(4, HandoverKind::Intermediate, 2)).unwrap();
  g.add_child(&[2], step(5, HandoverKind::Intermediate, 2)).unwrap();
  assert_eq!(g.leaves(), vec![3, 4, 5]);
  assert!(!g.is_leaf(2));
}

#[test]
fn join_has_many_parents_and_appears_once_in_bfs() {
  let mut g = WorkflowGraph::new(WF, step(1, HandoverKind::Start, 2));
  g.add_child(&[1], step(2, HandoverKind::Split, 3)).unwrap();
  g.add_child(&[2], step(3, HandoverKind::Intermediate, 2)).unwrap();
  g.add_child(&[2], step(4, HandoverKind::Intermediate, 2)).unwrap();
  g.add_child(&[3, 4], step(5, HandoverKind::Join, 2)).unwrap();
  assert_eq!(g.bfs(), vec![1, 2, 3, 4, 5]);
  assert_eq!(g.step(5).unwrap().parents, vec![3, 4]);
  assert_eq!(g.leaves(), vec![5]);
  g.add_child(&[5], step(6, HandoverKind::End, 2)).unwrap();
  assert!(g.contains_end());
  assert_eq!(g.find_by_tx_hash(&TxHash::from_internal([6u8; 32])), Some(6));
}

#[test]
fn detach_removes_leaf_and_parent_edge() {
  let mut g = WorkflowGraph::new(WF, step(1, HandoverKind::Start, 2));
  g.add_child(&[1], step(2, HandoverKind::Intermediate, 2)).unwrap();
  assert!(g.detach(1).is_err());
  let removed = g.detach(2).unwrap();
  assert_eq!(removed.id, 2);
  assert!(g.step(1).unwrap().children.is_empty());
  assert_eq!(g.leaves(), vec![1]);
}

#[test]
fn duplicate_ids_are_rejected() {
  let mut g = WorkflowGraph::new(WF, step(1, HandoverKind::Start, 2));
  assert!(g.add_child(&[1], step(1, HandoverKind::Intermediate, 2)).is_err());
  assert!(g.add_child(&[8], step(2, HandoverKind::Intermediate, 2)).is_err());
}

#[test]
fn describe_lists_steps_in_bfs_order() {
  let mut g = WorkflowGraph::new(WF, step(1, HandoverKind::Start, 2));
  g.add_child(&[1], step(2, HandoverKind::End, 2)).unwrap();
  let simple = g.describe(false);
  assert_eq!(simple.len(), 2);
  assert!(simple[0].contains("START"));
  assert!(simple[1].contains("END Task:0"));
  assert!(g.describe(true)[1].contains("Template:false"));
}

#[test]
fn in_memory_repository_round_trip_keeps_fingerprint() {
  let repo = InMemoryGraphRepository::new();
  let mut g = WorkflowGraph::new(WF, step(1, HandoverKind::Start, 2));
  g.add_child(&[1], step(2, HandoverKind::Intermediate, 2)).unwrap();
  let fp = g.fingerprint().unwrap();
  let mut graphs = BTreeMap::new();
  graphs.insert(WF, g);
  repo.save(&GraphSnapshot::new(IdAllocator::starting_after(2), &graphs)).unwrap();
  assert_eq!(repo.save_count(), 1);

  let (mut ids, loaded) = repo.load().unwrap().into_parts();
  assert_eq!(loaded[&WF].fingerprint().unwrap(), fp);
  assert_eq!(ids.next_id(), 3);

  // el snapshot sobrevive a JSON
  let json = serde_json::to_string(&GraphSnapshot::new(ids, &loaded)).unwrap();
  let back: GraphSnapshot = serde_json::from_str(&json).unwrap();
  assert_eq!(back.into_parts().1[&WF], loaded[&WF]);
}
