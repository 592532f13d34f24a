//! Composite loss computation for one batch.
//!
//! The training step and the held-out evaluation pass share this code path,
//! so the output envelope is consumed identically in both.

use super::loss::{
    imitation_loss, lang_reconstruction_loss, reduce_device_scalar, state_reconstruction_loss,
    zero_scalar,
};
use super::masking::{flatten_masked, masked_action_pairs, masked_state_pairs, next_q_targets};
use crate::data::{pad_to_multiple, TrajectoryBatch};
use crate::model::{IqBatch, Policy, Tokenizer};
use crate::Result;
use tch::{Device, Kind, Tensor};

/// Losses and diagnostics for one batch, with the graph still attached to
/// `loss` for backpropagation.
pub(crate) struct BatchLosses {
    pub loss: Tensor,
    pub act_loss: Tensor,
    pub state_loss: Tensor,
    pub options_loss: Tensor,
    pub state_rc_loss: Tensor,
    pub lang_rc_loss: Tensor,
    pub commitment_loss: Tensor,
    pub entropy: Tensor,
    pub lang_entropy: Tensor,
    /// `1 - accuracy` over masked rows; discrete action spaces only.
    pub action_error: Option<f64>,
}

/// Tokenize, pad, mask, forward, and compose the six-term loss for a batch.
pub(crate) fn compute_batch_losses(
    model: &dyn Policy,
    tokenizer: &dyn Tokenizer,
    batch: &TrajectoryBatch,
    state_il: bool,
    chunk_length: i64,
    device: Device,
    step: i64,
) -> Result<BatchLosses> {
    let discrete = model.discrete();
    let act_dim = model.act_dim();

    let encoding = tokenizer.tokenize(&batch.langs, true)?;
    let lang_ids = encoding.token_ids.to_device(device);
    let lang_mask = encoding.attention_mask.to_device(device);

    // Option-based methods reshape into chunks; pad so that never truncates.
    let batch = if model.method().needs_chunking() {
        pad_to_multiple(batch, chunk_length)?.to_device(device)
    } else {
        batch.to_device(device)
    };

    // Undisturbed targets, cloned before any input-side mutation.
    let action_target = batch.actions.copy().detach();
    let state_target = batch.states.copy().detach();

    // One-hot encode the model-input side only; targets stay indices.
    let actions_in = if discrete {
        batch.actions.one_hot(act_dim).to_kind(Kind::Float)
    } else {
        batch.actions.to_kind(Kind::Float)
    };
    let states_in = batch.states.to_kind(Kind::Float);

    let output = model.forward(
        &lang_ids,
        &lang_mask,
        &states_in,
        &actions_in,
        &batch.timesteps,
        &batch.attention_mask,
    )?;

    // Optional heads normalize to exact zero; per-device vectors are
    // averaged into one scalar before composition.
    let commitment_loss = output
        .commitment_loss
        .as_ref()
        .map(reduce_device_scalar)
        .unwrap_or_else(|| zero_scalar(device));
    let options_loss = output
        .options_loss
        .as_ref()
        .map(reduce_device_scalar)
        .unwrap_or_else(|| zero_scalar(device));
    let (entropy, lang_entropy) = match &output.entropy {
        Some((ent, lang_ent)) => (reduce_device_scalar(ent), reduce_device_scalar(lang_ent)),
        None => (zero_scalar(device), zero_scalar(device)),
    };

    let mask = &batch.attention_mask;
    let (mut action_pred_rows, action_target_rows) =
        masked_action_pairs(&output.action_preds, &action_target, mask)?;
    let state_pair = if state_il {
        Some(masked_state_pairs(&output.state_preds, &state_target, mask)?)
    } else {
        None
    };
    let dones_rows = flatten_masked(&batch.dones, mask)?;

    // Inverse-Q scoring replaces the plain action loss when the model
    // carries a Q head and supplies a critic.
    let mut critic_loss = None;
    if model.predict_q() {
        if let Some(q_preds) = &output.q_preds {
            let next_q = next_q_targets(q_preds)?;
            let q_rows = flatten_masked(q_preds, mask)?;
            let next_q_rows = flatten_masked(&next_q, mask)?;
            let iq = IqBatch {
                q_preds: q_rows.shallow_clone(),
                next_q: next_q_rows,
                action_targets: action_target_rows.shallow_clone(),
                dones: dones_rows.shallow_clone(),
            };
            critic_loss = model.iq_critic_loss(&iq, step);
            if critic_loss.is_some() {
                // Actions now come from the Q-network for diagnostics.
                let chosen = model.iq_choose_action(&q_rows);
                action_pred_rows = if discrete {
                    chosen.one_hot(act_dim).to_kind(Kind::Float)
                } else {
                    chosen
                };
            }
        }
    }

    let (act_loss, state_loss) = imitation_loss(
        &action_pred_rows,
        &action_target_rows,
        state_pair.as_ref().map(|(preds, _)| preds),
        state_pair.as_ref().map(|(_, targets)| targets),
        critic_loss,
        discrete,
    );

    let state_rc_loss = state_reconstruction_loss(output.state_rc.as_ref(), device);
    let lang_rc_loss = lang_reconstruction_loss(output.lang_rc.as_ref(), device);

    let loss = &act_loss
        + &state_loss
        + &options_loss
        + &state_rc_loss
        + &lang_rc_loss
        + &commitment_loss;

    let action_error = discrete.then(|| {
        tch::no_grad(|| {
            let correct = action_pred_rows
                .argmax(1, false)
                .eq_tensor(&action_target_rows)
                .to_kind(Kind::Float)
                .mean(Kind::Float)
                .double_value(&[]);
            1.0 - correct
        })
    });

    Ok(BatchLosses {
        loss,
        act_loss,
        state_loss,
        options_loss,
        state_rc_loss,
        lang_rc_loss,
        commitment_loss,
        entropy,
        lang_entropy,
        action_error,
    })
}
