// token_size.rs
// Presupuesto del token inicial: cubre las comisiones esperadas de cada paso
// y de cada split (con sus dos ramas), multiplicado por un margen de 3.

const START_COST: u64 = 13_100;
const END_COST: u64 = 13_850;
const STEP_COST: u64 = 15_500;
const SPLIT_COST: u64 = 14_350;
const SPLIT_BRANCH_COST: u64 = 21_500;
const SAFETY_FACTOR: u64 = 3;

/// Valor (en satoshis) del token de un workflow con `expected_steps` pasos
/// y `expected_splits` splits.
pub fn estimate_token_size(expected_steps: u32, expected_splits: u32) -> u64 {
  (START_COST
   + END_COST
   + u64::from(expected_steps) * STEP_COST
   + u64::from(expected_splits) * (SPLIT_COST + SPLIT_BRANCH_COST))
  * SAFETY_FACTOR
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_workflow_covers_start_and_end() {
    assert_eq!(estimate_token_size(0, 0), (13_100 + 13_850) * 3);
  }

  #[test]
  fn grows_with_steps_and_splits() {
    assert_eq!(estimate_token_size(2, 1) - estimate_token_size(0, 0), (2 * 15_500 + 35_850) * 3);
  }
}
