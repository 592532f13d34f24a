//! Loss functions for masked imitation learning.
//!
//! All functions degrade to an exact-zero scalar when an optional input is
//! absent, so the composite loss always has the same six terms and gradient
//! flow does not depend on which heads are active. Presence is decided by
//! `Option`, never by truth-testing a tensor.

use tch::{Device, Reduction, Tensor};

/// A zero scalar on the given device.
pub fn zero_scalar(device: Device) -> Tensor {
    Tensor::from(0f32).to_device(device)
}

/// Action and state imitation losses over masked rows.
///
/// Cross-entropy against class indices when discrete, MSE otherwise. A
/// supplied inverse-Q critic loss fully replaces the plain action loss.
/// The state loss is zero when either side of the pair is absent.
pub fn imitation_loss(
    action_preds: &Tensor,
    action_target: &Tensor,
    state_preds: Option<&Tensor>,
    state_targets: Option<&Tensor>,
    critic_loss: Option<Tensor>,
    discrete: bool,
) -> (Tensor, Tensor) {
    let act_loss = match critic_loss {
        Some(loss) => loss,
        None => {
            if discrete {
                action_preds.cross_entropy_for_logits(action_target)
            } else {
                action_preds.mse_loss(action_target, Reduction::Mean)
            }
        }
    };

    let state_loss = match (state_preds, state_targets) {
        (Some(preds), Some(targets)) => preds.mse_loss(targets, Reduction::Mean),
        _ => zero_scalar(action_preds.device()),
    };

    (act_loss, state_loss)
}

/// MSE between a reconstruction pair, zero when the pair is absent.
pub fn reconstruction_loss(pair: Option<&(Tensor, Tensor)>, device: Device) -> Tensor {
    match pair {
        Some((preds, targets)) => preds.mse_loss(targets, Reduction::Mean),
        None => zero_scalar(device),
    }
}

/// State-reconstruction loss.
pub fn state_reconstruction_loss(pair: Option<&(Tensor, Tensor)>, device: Device) -> Tensor {
    reconstruction_loss(pair, device)
}

/// Language-reconstruction loss.
pub fn lang_reconstruction_loss(pair: Option<&(Tensor, Tensor)>, device: Device) -> Tensor {
    reconstruction_loss(pair, device)
}

/// Reduce a scalar that may arrive as a per-device vector (one entry per
/// compute device) into a single scalar. This is the only reduction at the
/// boundary between distributed execution and loss composition.
pub fn reduce_device_scalar(value: &Tensor) -> Tensor {
    if value.dim() == 0 {
        value.shallow_clone()
    } else {
        value.mean(tch::Kind::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    #[test]
    fn test_reconstruction_exact_value() {
        let preds = Tensor::from_slice(&[1.0f32, 2.0]).reshape([1, 2]);
        let targets = Tensor::from_slice(&[0.0f32, 2.0]).reshape([1, 2]);
        let loss = reconstruction_loss(Some(&(preds, targets)), Device::Cpu);
        assert!((loss.double_value(&[]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reconstruction_zero_when_absent() {
        let loss = reconstruction_loss(None, Device::Cpu);
        assert_eq!(loss.double_value(&[]), 0.0);
    }

    #[test]
    fn test_discrete_action_loss_is_cross_entropy() {
        let preds = Tensor::from_slice(&[5.0f32, -5.0, -5.0, 5.0]).reshape([2, 2]);
        let targets = Tensor::from_slice(&[0i64, 1]);
        let (act, state) = imitation_loss(&preds, &targets, None, None, None, true);
        // confident correct logits -> near-zero loss
        assert!(act.double_value(&[]) < 1e-3);
        assert_eq!(state.double_value(&[]), 0.0);
    }

    #[test]
    fn test_continuous_action_loss_is_mse() {
        let preds = Tensor::from_slice(&[1.0f32, 0.0]).reshape([1, 2]);
        let targets = Tensor::from_slice(&[0.0f32, 0.0]).reshape([1, 2]);
        let (act, _) = imitation_loss(&preds, &targets, None, None, None, false);
        assert!((act.double_value(&[]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_critic_loss_replaces_action_loss() {
        let preds = Tensor::from_slice(&[5.0f32, -5.0]).reshape([1, 2]);
        let targets = Tensor::from_slice(&[0i64]);
        let critic = Tensor::from(3.0f32);
        let (act, _) = imitation_loss(&preds, &targets, None, None, Some(critic), true);
        assert!((act.double_value(&[]) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_reduce_device_scalar() {
        let per_device = Tensor::from_slice(&[1.0f32, 3.0]);
        let reduced = reduce_device_scalar(&per_device);
        assert_eq!(reduced.dim(), 0);
        assert!((reduced.double_value(&[]) - 2.0).abs() < 1e-6);

        let already = Tensor::from(2.5f32);
        assert_eq!(reduce_device_scalar(&already).double_value(&[]), 2.5);
    }

    #[test]
    fn test_state_loss_present() {
        let sp = Tensor::ones([3, 2], (Kind::Float, Device::Cpu));
        let st = Tensor::zeros([3, 2], (Kind::Float, Device::Cpu));
        let ap = Tensor::from_slice(&[1.0f32, 0.0]).reshape([1, 2]);
        let at = Tensor::from_slice(&[0i64]);
        let (_, state) = imitation_loss(&ap, &at, Some(&sp), Some(&st), None, true);
        assert!((state.double_value(&[]) - 1.0).abs() < 1e-6);
    }
}
