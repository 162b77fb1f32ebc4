use chain_domain::classifier::{classify, is_end, is_intermediate, is_join, is_split, is_start};
use chain_domain::script::{data_carrier_script, p2sh_output_script, redeem_script};
use chain_domain::{data_block, offchain, Address, DomainError, HandoverData, HandoverKind, KeyPair, LocalTransaction,
                   PublicKey, ShapeBuilder, SpendableToken, Transaction, TransactionSigner, TxOut, WorkflowHandoverData,
                   WorkflowInstance, SIG_SIZE};

struct Keyring(Vec<KeyPair>);

impl Keyring {
  fn new(prefix: &str, n: usize) -> Self {
    Keyring((0..n).map(|i| KeyPair::from_seed(format!("{}/{}", prefix, i).as_bytes()).unwrap()).collect())
  }

  fn key(&self, i: usize) -> PublicKey {
    self.0[i].public_key().clone()
  }
}

impl TransactionSigner for Keyring {
  fn sign_digest(&self, key: &PublicKey, digest: &[u8; 32]) -> Result<Vec<u8>, DomainError> {
    let kp = self.0
                 .iter()
                 .find(|k| k.public_key() == key)
                 .ok_or_else(|| DomainError::ValidationError("clave desconocida".into()))?;
    kp.sign_digest(digest)
  }
}

const WF: WorkflowInstance = WorkflowInstance(42);
const TOKEN: u64 = 300_000;

fn start(builder: &ShapeBuilder, key: &PublicKey) -> HandoverData {
  let whd = WorkflowHandoverData::start(WF, 1_000);
  let tx = builder.start_skeleton(&whd, key, TOKEN).unwrap();
  builder.start_handover(&whd, key, LocalTransaction::new(tx, vec![]), TOKEN).unwrap()
}

#[test]
fn codec_round_trip_for_every_kind() {
  let kinds = [HandoverKind::Start, HandoverKind::End, HandoverKind::Split, HandoverKind::Join, HandoverKind::Intermediate];
  for kind in kinds {
    let whd = WorkflowHandoverData::new(WF, 5, kind, 123_456);
    let bytes = data_block::encode(&whd, None).unwrap();
    let block = data_block::decode(&bytes).unwrap();
    assert_eq!(block.kind, kind);
    assert_eq!(block.to_handover_data(), whd);
  }
}

#[test]
fn signed_intermediate_round_trip_keeps_signature() {
  let kp = KeyPair::from_seed(b"firma").unwrap();
  let sig = kp.sign_digest(&[1u8; 32]).unwrap();
  let whd = WorkflowHandoverData::intermediate(WF, 9, 77);
  let bytes = data_block::encode(&whd, Some(&sig)).unwrap();
  assert_eq!(bytes.len(), 80);
  assert_eq!(bytes[0] as usize, 7 + sig.len());
  let block = data_block::decode(&bytes).unwrap();
  assert_eq!(block.signature.as_deref(), Some(sig.as_slice()));
  let stripped = data_block::strip_signature(&bytes).unwrap();
  assert_eq!(stripped, data_block::encode(&whd, None).unwrap());
}

#[test]
fn full_handover_between_two_parties() {
  let builder = ShapeBuilder::default();
  let sender = Keyring::new("emisor", 1);
  let receiver = Keyring::new("receptor", 1);
  let root = start(&builder, &sender.key(0));
  let prev = SpendableToken::from_handover(&root, 0).unwrap();

  let mut whd = WorkflowHandoverData::intermediate(WF, 3, 2_000);
  whd.set_workflow_data(b"orden de compra".to_vec());
  let template = builder.handover_template(&whd, &prev, &receiver.key(0)).unwrap();
  assert!(template.is_template());
  let template_tx = template.reference().unwrap().transaction();
  assert_eq!(classify(&template_tx, &[]).unwrap(), HandoverKind::Intermediate);

  // el receptor recibe sólo los bytes serializados
  let shipped = Transaction::deserialize(&template.reference().unwrap().serialize().unwrap()).unwrap();
  let off_chain = offchain::sign(&shipped, &receiver.key(0), &receiver).unwrap();

  let finished = builder.finish_handover_template(&template, &prev, &off_chain, &sender).unwrap();
  assert!(!finished.is_template());
  let published = finished.reference().unwrap().transaction();
  published.verify_p2sh_input(0, &prev.output.script_pubkey).unwrap();
  assert!(is_intermediate(&published, &[Some(prev.output.script_pubkey.clone())]).unwrap().has_signature());

  // el receptor reconstruye el mismo txid
  let rebuilt = builder.finish_template_on_receiver_side(&template, &published.inputs[0].script_sig, &off_chain).unwrap();
  assert_eq!(rebuilt.reference().unwrap().tx_hash(), finished.reference().unwrap().tx_hash());

  // el token queda en P2SH(clave receptor, hash160(payload))
  let expected = p2sh_output_script(&redeem_script(&receiver.key(0).pubkey_hash(), &whd.commitments()));
  assert_eq!(published.outputs[0].script_pubkey, expected);
}

#[test]
fn wrong_off_chain_signature_is_rejected() {
  let builder = ShapeBuilder::default();
  let sender = Keyring::new("emisor", 1);
  let receiver = Keyring::new("receptor", 1);
  let intruder = Keyring::new("intruso", 1);
  let root = start(&builder, &sender.key(0));
  let prev = SpendableToken::from_handover(&root, 0).unwrap();
  let whd = WorkflowHandoverData::intermediate(WF, 1, 10);
  let template = builder.handover_template(&whd, &prev, &receiver.key(0)).unwrap();
  let tx = template.reference().unwrap().transaction();
  let forged = offchain::sign(&tx, &intruder.key(0), &intruder).unwrap();
  let res = builder.finish_handover_template(&template, &prev, &forged, &sender);
  assert!(matches!(res, Err(DomainError::SignatureMismatch(_))));
}

#[test]
fn canonicalization_is_idempotent() {
  let builder = ShapeBuilder::default();
  let sender = Keyring::new("emisor", 1);
  let receiver = Keyring::new("receptor", 1);
  let root = start(&builder, &sender.key(0));
  let prev = SpendableToken::from_handover(&root, 0).unwrap();
  let template = builder.handover_template(&WorkflowHandoverData::intermediate(WF, 1, 10), &prev, &receiver.key(0)).unwrap();
  let tx = template.reference().unwrap().transaction();
  let sig = offchain::sign(&tx, &receiver.key(0), &receiver).unwrap();
  let finished = builder.finish_handover_template(&template, &prev, &sig, &sender).unwrap();
  let published = finished.reference().unwrap().transaction();

  let once = offchain::canonical_transaction(&published).unwrap();
  let twice = offchain::canonical_transaction(&once).unwrap();
  assert_eq!(once, twice);
  assert_eq!(once, tx);
  assert_eq!(offchain::canonical_hash(&published).unwrap(), offchain::canonical_hash(&tx).unwrap());
}

#[test]
fn split_distributes_value_and_fee() {
  let builder = ShapeBuilder::default();
  let own = Keyring::new("propio", 4);
  let root = start(&builder, &own.key(0));
  let prev = SpendableToken::from_handover(&root, 0).unwrap();
  let keys = vec![own.key(1), own.key(2), own.key(3)];
  let split = builder.split(&WorkflowHandoverData::split(WF, 20), &prev, &keys, &own).unwrap();
  let reference = split.reference().unwrap();
  assert_eq!(reference.token_output_indices(), &[0, 1, 2]);
  let tx = reference.transaction();
  assert_eq!(tx.outputs.len(), 4);
  assert_eq!(classify(&tx, &reference.connected_scripts()).unwrap(), HandoverKind::Split);

  // la comisión se calcula sobre la transacción sin scripts de desbloqueo
  let mut unsigned = tx.clone();
  unsigned.inputs[0].script_sig = Default::default();
  let fee = builder.fee_for(&unsigned, 1, prev.template_unlock().len());
  assert_eq!(fee, 5_000 * (unsigned.serialize().len() + SIG_SIZE + prev.template_unlock().len()) as u64 / 1000);
  let paid: u64 = tx.outputs.iter().map(|o| o.value).sum();
  assert_eq!(paid + fee, TOKEN);
  assert_eq!(tx.outputs[0].value, tx.outputs[1].value);
}

#[test]
fn join_uses_all_unlock_lengths_for_fee() {
  let builder = ShapeBuilder::default();
  let own = Keyring::new("propio", 5);
  let root = start(&builder, &own.key(0));
  let prev = SpendableToken::from_handover(&root, 0).unwrap();
  let split = builder.split(&WorkflowHandoverData::split(WF, 20), &prev, &[own.key(1), own.key(2), own.key(3)], &own).unwrap();
  let tokens: Vec<SpendableToken> = (0..3).map(|i| SpendableToken::from_handover(&split, i).unwrap()).collect();
  let join = builder.join(&WorkflowHandoverData::join(WF, 30), &tokens, &own.key(4), &own).unwrap();
  let reference = join.reference().unwrap();
  let tx = reference.transaction();
  assert_eq!(tx.inputs.len(), 3);
  assert_eq!(classify(&tx, &reference.connected_scripts()).unwrap(), HandoverKind::Join);

  let mut unsigned = tx.clone();
  for input in unsigned.inputs.iter_mut() {
    input.script_sig = Default::default();
  }
  let unlock: usize = tokens.iter().map(|t| t.template_unlock().len()).sum();
  let fee = builder.fee_for(&unsigned, 3, unlock);
  let input_total: u64 = tokens.iter().map(|t| t.output.value).sum();
  assert_eq!(tx.outputs[0].value, input_total - fee);
}

#[test]
fn end_rejects_p2sh_destination() {
  let builder = ShapeBuilder::default();
  let own = Keyring::new("propio", 2);
  let root = start(&builder, &own.key(0));
  let prev = SpendableToken::from_handover(&root, 0).unwrap();
  let whd = WorkflowHandoverData::end(WF, 50);
  let p2sh = Address::ScriptHash([1u8; 20]);
  assert!(builder.end(&whd, &prev, &p2sh, &own).is_err());
  let end = builder.end(&whd, &prev, &Address::PubKeyHash(own.key(1).pubkey_hash()), &own).unwrap();
  assert!(end.reference().unwrap().token_output_indices().is_empty());
  let tx = end.reference().unwrap().transaction();
  assert!(is_end(&tx, &end.reference().unwrap().connected_scripts()).is_some());
}

#[test]
fn classifier_rejects_structural_variants() {
  let redeem = redeem_script(&[3u8; 20], &[]);
  let p2sh = p2sh_output_script(&redeem);
  let whd = WorkflowHandoverData::intermediate(WF, 1, 1);
  let carrier = data_carrier_script(&data_block::encode(&whd, None).unwrap()).unwrap();
  let mut tx = Transaction::new();
  tx.inputs.push(chain_domain::TxIn::new(chain_domain::OutPoint { txid: chain_domain::TxHash::from_internal([9u8; 32]), vout: 0 }));
  tx.outputs.push(TxOut { value: 10, script_pubkey: p2sh.clone() });
  tx.outputs.push(TxOut { value: 0, script_pubkey: carrier.clone() });
  assert_eq!(classify(&tx, &[]).unwrap(), HandoverKind::Intermediate);

  // input conectado a una salida que no es P2SH
  let p2pkh = Address::PubKeyHash([4u8; 20]).script_pubkey();
  assert!(matches!(classify(&tx, &[Some(p2pkh.clone())]), Err(DomainError::UnrecognizedStructure(_))));

  // salida 0 no P2SH
  let mut bad = tx.clone();
  bad.outputs[0].script_pubkey = p2pkh;
  assert!(classify(&bad, &[]).is_err());

  // bloque de datos con longitud no reconocida
  let mut bad = tx.clone();
  bad.outputs[1].script_pubkey = data_carrier_script(&[7u8; 30]).unwrap();
  assert!(matches!(classify(&bad, &[]), Err(DomainError::UnrecognizedStructure(_))));

  // tres salidas con bloque INTERMEDIATE no encaja en ninguna forma
  let mut bad = tx.clone();
  bad.outputs.push(TxOut { value: 0, script_pubkey: carrier });
  assert!(classify(&bad, &[]).is_err());
}

fn intermediate_block(len: u8, tail: &[u8]) -> Vec<u8> {
  let mut bytes = vec![len, 0x00, 0x01, 5, 0x00, 0x00, 0x00, 0x01];
  bytes.extend_from_slice(tail);
  bytes.resize(80, 0);
  bytes
}

#[test]
fn unsigned_intermediate_with_len_eight_decodes_without_signature() {
  let block = data_block::decode(&intermediate_block(8, &[])).unwrap();
  assert_eq!(block.kind, HandoverKind::Intermediate);
  assert_eq!(block.instance, WorkflowInstance(1));
  assert_eq!(block.task_id, 5);
  assert_eq!(block.timestamp, 1);
  assert!(!block.has_signature());

  let block = data_block::decode(&intermediate_block(7, &[])).unwrap();
  assert!(block.signature.is_none());
}

#[test]
fn zero_tail_with_mid_range_len_decodes_without_signature() {
  let block = data_block::decode(&intermediate_block(40, &[])).unwrap();
  assert_eq!(block.kind, HandoverKind::Intermediate);
  assert_eq!(block.task_id, 5);
  assert!(block.signature.is_none());
  assert_eq!(data_block::strip_signature(&intermediate_block(40, &[])).unwrap(),
             data_block::encode(&block.to_handover_data(), None).unwrap());
}

#[test]
fn short_nonzero_tail_is_rejected() {
  let bytes = intermediate_block(40, &[0x30u8; 33]);
  assert!(matches!(data_block::decode(&bytes), Err(DomainError::MalformedPayload(_))));
  let bytes = intermediate_block(9, &[0x01]);
  assert!(matches!(data_block::decode(&bytes), Err(DomainError::MalformedPayload(_))));
}

fn input_from(seed: u8) -> chain_domain::TxIn {
  chain_domain::TxIn::new(chain_domain::OutPoint { txid: chain_domain::TxHash::from_internal([seed; 32]), vout: 0 })
}

#[test]
fn classifier_rejects_start_variants() {
  let builder = ShapeBuilder::default();
  let key = KeyPair::from_seed(b"inicio").unwrap().public_key().clone();
  let whd = WorkflowHandoverData::start(WF, 1_000);
  let tx = builder.start_skeleton(&whd, &key, TOKEN).unwrap();
  assert!(is_start(&tx).is_some());

  let p2sh = p2sh_output_script(&redeem_script(&[3u8; 20], &[]));
  let mut bad = tx.clone();
  while bad.outputs.len() < 4 {
    bad.outputs.push(TxOut { value: 10, script_pubkey: p2sh.clone() });
  }
  assert!(is_start(&bad).is_none());
  assert!(matches!(classify(&bad, &[]), Err(DomainError::UnrecognizedStructure(_))));

  let mut bad = tx.clone();
  bad.outputs.truncate(1);
  assert!(classify(&bad, &[]).is_err());

  let mut bad = tx;
  bad.outputs[0].script_pubkey = Address::PubKeyHash([4u8; 20]).script_pubkey();
  assert!(classify(&bad, &[]).is_err());
}

#[test]
fn classifier_rejects_join_with_non_p2sh_input() {
  let p2sh = p2sh_output_script(&redeem_script(&[3u8; 20], &[]));
  let p2pkh = Address::PubKeyHash([4u8; 20]).script_pubkey();
  let whd = WorkflowHandoverData::join(WF, 2);
  let mut tx = Transaction::new();
  tx.inputs.push(input_from(1));
  tx.inputs.push(input_from(2));
  tx.outputs.push(TxOut { value: 20, script_pubkey: p2sh.clone() });
  tx.outputs.push(TxOut { value: 0, script_pubkey: data_carrier_script(&data_block::encode(&whd, None).unwrap()).unwrap() });
  assert_eq!(classify(&tx, &[]).unwrap(), HandoverKind::Join);
  assert_eq!(classify(&tx, &[Some(p2sh.clone()), Some(p2sh.clone())]).unwrap(), HandoverKind::Join);

  assert!(is_join(&tx, &[Some(p2sh.clone()), Some(p2pkh.clone())]).is_none());
  assert!(matches!(classify(&tx, &[Some(p2sh), Some(p2pkh)]), Err(DomainError::UnrecognizedStructure(_))));

  let mut single = tx.clone();
  single.inputs.truncate(1);
  assert!(classify(&single, &[]).is_err());
}

#[test]
fn classifier_rejects_split_variants() {
  let p2sh = p2sh_output_script(&redeem_script(&[3u8; 20], &[]));
  let whd = WorkflowHandoverData::split(WF, 3);
  let carrier = data_carrier_script(&data_block::encode(&whd, None).unwrap()).unwrap();
  let mut tx = Transaction::new();
  tx.inputs.push(input_from(5));
  tx.outputs.push(TxOut { value: 10, script_pubkey: p2sh.clone() });
  tx.outputs.push(TxOut { value: 10, script_pubkey: p2sh.clone() });
  tx.outputs.push(TxOut { value: 0, script_pubkey: carrier.clone() });
  assert_eq!(classify(&tx, &[]).unwrap(), HandoverKind::Split);

  // una salida de token P2PKH
  let mut bad = tx.clone();
  bad.outputs[1].script_pubkey = Address::PubKeyHash([4u8; 20]).script_pubkey();
  assert!(is_split(&bad, &[]).is_none());
  assert!(classify(&bad, &[]).is_err());

  // un único token más el bloque de datos
  let mut bad = tx.clone();
  bad.outputs.remove(0);
  assert!(classify(&bad, &[]).is_err());

  // el bloque de datos no va al final
  let mut bad = tx.clone();
  bad.outputs.swap(1, 2);
  assert!(classify(&bad, &[]).is_err());

  // input conectado a una salida que no es P2SH
  assert!(classify(&tx, &[Some(Address::PubKeyHash([4u8; 20]).script_pubkey())]).is_err());

  // compromisos y claves deben cubrir cada salida con token
  let reference = chain_domain::TransactionReference::local(LocalTransaction::new(tx, vec![]), vec![0, 1]);
  let keys = Keyring::new("split", 3);
  let three_keys = vec![keys.key(0), keys.key(1), keys.key(2)];
  assert!(matches!(HandoverData::new(whd.clone(), Some(reference.clone()), three_keys, vec![], true, false),
                   Err(DomainError::ValidationError(_))));
  assert!(matches!(HandoverData::new(whd.clone(), Some(reference.clone()), vec![], vec![Vec::new()], true, false),
                   Err(DomainError::ValidationError(_))));
  let split = HandoverData::new(whd, Some(reference), vec![keys.key(0), keys.key(1)], vec![Vec::new(); 2], true, false).unwrap();
  assert_eq!(split.reference().unwrap().token_output_indices(), &[0, 1]);
}
