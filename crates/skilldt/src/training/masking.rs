//! Masking and reshaping of padded trajectory batches.
//!
//! Every loss in this crate is computed on flattened, mask-filtered rows.
//! Next-state prediction needs shifted masks: the prediction at the final
//! step has no successor target, and target state 0 is the initial state,
//! not a prediction target.

use crate::{Error, Result};
use tch::Tensor;

/// Flatten `[B, T]` or `[B, T, D]` values and keep rows where `mask` != 0.
///
/// The mask must share the `[B, T]` leading shape of `values`; a mismatch is
/// a data-pipeline bug upstream and is fatal.
pub fn flatten_masked(values: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let vsize = values.size();
    let msize = mask.size();
    if msize.len() != 2 || vsize.len() < 2 || vsize[0] != msize[0] || vsize[1] != msize[1] {
        return Err(Error::ShapeMismatch {
            expected: msize,
            actual: vsize,
        });
    }

    let index = mask.reshape([-1]).nonzero().squeeze_dim(1);
    let flat = if vsize.len() == 3 {
        values.reshape([-1, vsize[2]])
    } else {
        values.reshape([-1])
    };
    Ok(flat.index_select(0, &index))
}

/// Masked (predictions, targets) for the action loss.
///
/// Discrete targets flatten to `[N]` class indices; continuous targets keep
/// the action dimension.
pub fn masked_action_pairs(
    action_preds: &Tensor,
    action_target: &Tensor,
    mask: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let preds = flatten_masked(action_preds, mask)?;
    let targets = flatten_masked(action_target, mask)?;
    Ok((preds, targets))
}

/// Shifted masks for next-state prediction.
///
/// Returns `(pred_mask, target_mask)`:
/// - `pred_mask = mask[:, :-1]` pairs with predictions for steps `0..T-1`
///   (the final step has no next-state target);
/// - `target_mask = [0, mask[:, :-1]]` pairs with the full target sequence
///   and always excludes state 0.
///
/// Both select the same number of rows.
pub fn shifted_state_masks(mask: &Tensor) -> Result<(Tensor, Tensor)> {
    let size = mask.size();
    if size.len() != 2 {
        return Err(Error::ShapeMismatch {
            expected: vec![-1, -1],
            actual: size,
        });
    }
    let (b, t) = (size[0], size[1]);

    let pred_mask = mask.narrow(1, 0, t - 1);
    let zeros = Tensor::zeros([b, 1], (mask.kind(), mask.device()));
    let target_mask = Tensor::cat(&[zeros, pred_mask.shallow_clone()], 1);
    Ok((pred_mask, target_mask))
}

/// Masked (predictions, targets) for the next-state loss.
///
/// Predictions are truncated to steps `0..T-1` so each side is filtered by a
/// mask of matching cardinality.
pub fn masked_state_pairs(
    state_preds: &Tensor,
    state_target: &Tensor,
    mask: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let (pred_mask, target_mask) = shifted_state_masks(mask)?;
    let t = mask.size()[1];

    let preds = flatten_masked(&state_preds.narrow(1, 0, t - 1), &pred_mask)?;
    let targets = flatten_masked(state_target, &target_mask)?;
    Ok((preds, targets))
}

/// Successor Q-values: `next_q[:, t] = q_preds[:, t+1]`, zeros at the final
/// step (the state after the trajectory's last step has no defined value).
pub fn next_q_targets(q_preds: &Tensor) -> Result<Tensor> {
    let size = q_preds.size();
    if size.len() != 3 {
        return Err(Error::ShapeMismatch {
            expected: vec![-1, -1, -1],
            actual: size,
        });
    }
    let (b, t, a) = (size[0], size[1], size[2]);

    let shifted = q_preds.narrow(1, 1, t - 1);
    let zeros = Tensor::zeros([b, 1, a], (q_preds.kind(), q_preds.device()));
    Ok(Tensor::cat(&[shifted, zeros], 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn mask_2x4() -> Tensor {
        // one full trajectory, one padded after step 2
        Tensor::from_slice(&[1i64, 1, 1, 1, 1, 1, 0, 0]).reshape([2, 4])
    }

    #[test]
    fn test_flatten_masked_row_count() {
        let mask = mask_2x4();
        let preds = Tensor::randn([2, 4, 3], (Kind::Float, Device::Cpu));
        let rows = flatten_masked(&preds, &mask).unwrap();
        // 4 + 2 valid steps
        assert_eq!(rows.size(), vec![6, 3]);
    }

    #[test]
    fn test_flatten_masked_rejects_mismatch() {
        let mask = Tensor::ones([2, 5], (Kind::Int64, Device::Cpu));
        let preds = Tensor::randn([2, 4, 3], (Kind::Float, Device::Cpu));
        assert!(flatten_masked(&preds, &mask).is_err());
    }

    #[test]
    fn test_shifted_masks_cardinality() {
        // all-ones trajectory of length T: both sides select T-1 rows
        let mask = Tensor::ones([1, 6], (Kind::Int64, Device::Cpu));
        let (pred_mask, target_mask) = shifted_state_masks(&mask).unwrap();
        assert_eq!(pred_mask.size(), vec![1, 5]);
        assert_eq!(target_mask.size(), vec![1, 6]);
        let pred_ones = pred_mask.sum(Kind::Int64).int64_value(&[]);
        let target_ones = target_mask.sum(Kind::Int64).int64_value(&[]);
        assert_eq!(pred_ones, 5);
        assert_eq!(target_ones, 5);
        // target excludes the first step
        assert_eq!(target_mask.int64_value(&[0, 0]), 0);
    }

    #[test]
    fn test_masked_state_pairs_end_to_end() {
        // valid lengths 4 and 2: transitions from steps 0..3 and 0..2
        let mask = mask_2x4();
        let preds = Tensor::randn([2, 4, 3], (Kind::Float, Device::Cpu));
        let targets = Tensor::randn([2, 4, 3], (Kind::Float, Device::Cpu));
        let (p, t) = masked_state_pairs(&preds, &targets, &mask).unwrap();
        assert_eq!(p.size(), t.size());
        assert_eq!(p.size()[0], 5);
    }

    #[test]
    fn test_next_q_shift() {
        let q = Tensor::arange(2 * 3 * 2, (Kind::Float, Device::Cpu)).reshape([2, 3, 2]);
        let next = next_q_targets(&q).unwrap();
        assert_eq!(next.size(), q.size());
        // next_q[:, t] == q[:, t+1] for t < T-1
        let a: f64 = next.double_value(&[0, 0, 0]);
        let b: f64 = q.double_value(&[0, 1, 0]);
        assert_eq!(a, b);
        // final step is all zeros
        assert_eq!(next.double_value(&[0, 2, 0]), 0.0);
        assert_eq!(next.double_value(&[1, 2, 1]), 0.0);
    }
}
