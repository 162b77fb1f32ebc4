// data_block.rs
// Codec del bloque de datos de 80 bytes que viaja en la salida OP_RETURN:
// `[len][workflowId BE16][taskId][timestamp BE32][sufijo]`.
use crate::workflow::{HandoverKind, WorkflowHandoverData, WorkflowInstance};
use crate::DomainError;
use k256::ecdsa::Signature;

pub const MAX_PAYLOAD_LEN: usize = 80;
pub const HEADER_LEN: usize = 8;
pub const MIN_SIGNATURE_LEN: usize = 69;
pub const MAX_SIGNATURE_LEN: usize = 72;

const START_MARKER: &[u8] = b"Start of workflow.";
const END_MARKER: &[u8] = b"End of workflow.";
const SPLIT_MARKER: &[u8] = b"Split of workflow.";
const JOIN_MARKER: &[u8] = b"Join of workflow.";

// Orden de discriminación al decodificar.
const MARKERS: [(HandoverKind, &[u8]); 4] = [(HandoverKind::Start, START_MARKER),
                                             (HandoverKind::End, END_MARKER),
                                             (HandoverKind::Join, JOIN_MARKER),
                                             (HandoverKind::Split, SPLIT_MARKER)];

fn marker_of(kind: HandoverKind) -> Option<&'static [u8]> {
  MARKERS.iter().find(|(k, _)| *k == kind).map(|(_, m)| *m)
}

/// Contenido decodificado de un bloque de datos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
  pub instance: WorkflowInstance,
  pub task_id: u8,
  pub kind: HandoverKind,
  pub timestamp: u32,
  /// Firma off-chain del receptor; sólo en INTERMEDIATE ya completados.
  pub signature: Option<Vec<u8>>,
}

impl DataBlock {
  pub fn has_signature(&self) -> bool {
    self.signature.is_some()
  }

  /// Metadatos sin payload (el payload nunca viaja en la cadena).
  pub fn to_handover_data(&self) -> WorkflowHandoverData {
    WorkflowHandoverData::new(self.instance, self.task_id, self.kind, self.timestamp)
  }
}

/// Codifica los metadatos. Con `signature = Some(..)` se exige una firma de
/// al menos 69 bytes; los tipos con marcador ignoran la firma.
pub fn encode(whd: &WorkflowHandoverData, signature: Option<&[u8]>) -> Result<Vec<u8>, DomainError> {
  let mut out = Vec::with_capacity(MAX_PAYLOAD_LEN);
  out.push(0);
  out.extend_from_slice(&whd.instance().id().to_be_bytes());
  out.push(whd.task_id());
  out.extend_from_slice(&whd.timestamp().to_be_bytes());
  match marker_of(whd.kind()) {
    Some(marker) => out.extend_from_slice(marker),
    None => {
      if let Some(sig) = signature {
        if sig.len() < MIN_SIGNATURE_LEN || sig.len() > MAX_SIGNATURE_LEN {
          return Err(DomainError::MalformedPayload(format!("firma de {} bytes fuera de [{}, {}]",
                                                           sig.len(),
                                                           MIN_SIGNATURE_LEN,
                                                           MAX_SIGNATURE_LEN)));
        }
        out.extend_from_slice(sig);
      }
    }
  }
  // len cuenta los bytes tras sí mismo, sin el relleno.
  out[0] = (out.len() - 1) as u8;
  if whd.kind() == HandoverKind::Intermediate {
    out.resize(MAX_PAYLOAD_LEN, 0);
  }
  Ok(out)
}

pub fn decode(payload: &[u8]) -> Result<DataBlock, DomainError> {
  if payload.len() < HEADER_LEN || payload.len() > MAX_PAYLOAD_LEN {
    return Err(DomainError::MalformedPayload(format!("longitud total {} inválida", payload.len())));
  }
  let len = payload[0] as usize;
  if len > payload.len() - 1 {
    return Err(DomainError::MalformedPayload(format!("len={} excede el payload de {} bytes", len, payload.len())));
  }
  let instance = WorkflowInstance(u16::from_be_bytes([payload[1], payload[2]]));
  let task_id = payload[3];
  let timestamp = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

  for (kind, marker) in MARKERS.iter() {
    if payload.len() == HEADER_LEN + marker.len() && payload.ends_with(marker) {
      return Ok(DataBlock { instance, task_id: 0, kind: *kind, timestamp, signature: None });
    }
  }
  if payload.len() != MAX_PAYLOAD_LEN {
    return Err(DomainError::MalformedPayload("ni marcador conocido ni bloque INTERMEDIATE".to_string()));
  }
  if len < HEADER_LEN - 1 {
    return Err(DomainError::MalformedPayload(format!("len={} menor que la cabecera", len)));
  }
  let signature = if signature_absent(payload, len) {
    None
  } else {
    let sig = &payload[HEADER_LEN..1 + len];
    if sig.len() < MIN_SIGNATURE_LEN {
      return Err(DomainError::MalformedPayload(format!("firma de {} bytes", sig.len())));
    }
    Signature::from_der(sig).map_err(|e| DomainError::MalformedPayload(format!("firma no DER: {}", e)))?;
    Some(sig.to_vec())
  };
  Ok(DataBlock { instance, task_id, kind: HandoverKind::Intermediate, timestamp, signature })
}

/// Plantilla sin firma: `len` de 7 u 8 (cabecera sin cola útil) o cola
/// entera a cero hasta los 80 bytes.
fn signature_absent(payload: &[u8], len: usize) -> bool {
  len <= HEADER_LEN || payload[HEADER_LEN..].iter().all(|b| *b == 0)
}

/// Recodifica un bloque INTERMEDIATE sin su firma.
pub fn strip_signature(payload: &[u8]) -> Result<Vec<u8>, DomainError> {
  let block = decode(payload)?;
  encode(&block.to_handover_data(), None)
}
