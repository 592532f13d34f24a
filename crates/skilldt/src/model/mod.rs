//! Policy and tokenizer collaborator interfaces.
//!
//! Provides:
//! - `Policy` - trait the trainer drives; any sequence model qualifies
//! - `ModelOutput` - tagged-optional output envelope of a forward pass
//! - `Tokenizer` - language encoding collaborator
//! - `ReferencePolicy` / `HashTokenizer` - compact reference implementations

mod reference;
mod tokenizer;

pub use reference::{ReferencePolicy, ReferencePolicyConfig};
pub use tokenizer::HashTokenizer;

use crate::Result;
use tch::{nn, Tensor};

/// How the policy consumes trajectories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PolicyMethod {
    /// Plain decision transformer, no option selector.
    Vanilla,
    /// One option per fixed-size chunk, selected stepwise.
    Option,
    /// Options selected from the full trajectory prefix.
    TrajOption,
}

impl PolicyMethod {
    /// Option-based methods require chunk-aligned sequence lengths.
    pub fn needs_chunking(&self) -> bool {
        !matches!(self, PolicyMethod::Vanilla)
    }
}

/// Tokenized language batch.
pub struct Encoding {
    /// `[B, L]` int64 token ids
    pub token_ids: Tensor,
    /// `[B, L]` int64, 1 = real token
    pub attention_mask: Tensor,
}

/// Language tokenizer collaborator.
pub trait Tokenizer: Send {
    /// Tokenize a batch of strings, padding to a common length when `pad`.
    fn tokenize(&self, texts: &[String], pad: bool) -> Result<Encoding>;

    /// Split a string into surface tokens (for diagnostics, not model input).
    fn words(&self, text: &str) -> Vec<String>;
}

/// Flattened, mask-filtered inputs to an inverse-Q critic loss.
pub struct IqBatch {
    /// `[N, A]` Q-values at each valid step
    pub q_preds: Tensor,
    /// `[N, A]` Q-values of the successor step (zeros after the final step)
    pub next_q: Tensor,
    /// `[N]` int64 expert action indices
    pub action_targets: Tensor,
    /// `[N]` int64 done flags
    pub dones: Tensor,
}

/// Output envelope of one forward pass.
///
/// Optional heads are tagged options; an absent field contributes exactly
/// zero to the composite loss. Tensors are never truth-tested for presence.
pub struct ModelOutput {
    /// `[B, T, S]` next-state predictions
    pub state_preds: Tensor,
    /// `[B, T, A]` action logits (discrete) or action values (continuous)
    pub action_preds: Tensor,
    /// `[B, T, A]` Q-value head, when the policy scores actions by value
    pub q_preds: Option<Tensor>,
    /// Option-selector loss; may be a per-device vector under data parallelism
    pub options_loss: Option<Tensor>,
    /// (prediction, target) pair for state reconstruction
    pub state_rc: Option<(Tensor, Tensor)>,
    /// (prediction, target) pair for language reconstruction
    pub lang_rc: Option<(Tensor, Tensor)>,
    /// Vector-quantization commitment loss; may be a per-device vector
    pub commitment_loss: Option<Tensor>,
    /// (policy entropy, language entropy) diagnostics
    pub entropy: Option<(Tensor, Tensor)>,
    /// `[B, T]` int64 chosen option index per step, for rollout traces
    pub options: Option<Tensor>,
}

impl ModelOutput {
    /// A minimal envelope with every optional head absent.
    pub fn new(state_preds: Tensor, action_preds: Tensor) -> Self {
        Self {
            state_preds,
            action_preds,
            q_preds: None,
            options_loss: None,
            state_rc: None,
            lang_rc: None,
            commitment_loss: None,
            entropy: None,
            options: None,
        }
    }
}

/// The policy collaborator driven by the trainer.
///
/// Implementations own their parameters in a `nn::VarStore`; the trainer
/// builds the optimizer over it and the checkpoint manager serializes it.
/// Multi-device wrappers must report the canonical (unreplicated) store.
pub trait Policy {
    /// Forward pass over one padded batch.
    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        lang_token_ids: &Tensor,
        lang_attention_mask: &Tensor,
        states: &Tensor,
        actions: &Tensor,
        timesteps: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<ModelOutput>;

    /// Whether the action space is discrete.
    fn discrete(&self) -> bool;

    /// Action dimensionality (number of classes when discrete).
    fn act_dim(&self) -> i64;

    /// State dimensionality.
    fn state_dim(&self) -> i64;

    fn method(&self) -> PolicyMethod;

    /// Decision-transformer context horizon.
    fn horizon(&self) -> i64;

    /// Whether the model predicts Q-values (enables the inverse-Q path).
    fn predict_q(&self) -> bool {
        false
    }

    /// Number of discrete options, when an option selector is present.
    fn num_options(&self) -> i64 {
        0
    }

    /// Whether the option selector learns a vector-quantized codebook.
    fn use_vq(&self) -> bool {
        false
    }

    /// Inverse-Q critic loss; replaces the plain action loss when `Some`.
    ///
    /// `step` allows schedule-dependent critic weighting.
    fn iq_critic_loss(&self, _batch: &IqBatch, _step: i64) -> Option<Tensor> {
        None
    }

    /// Pick actions from masked Q-value rows (`[N, A]` -> `[N]`).
    fn iq_choose_action(&self, q_rows: &Tensor) -> Tensor {
        q_rows.argmax(1, false)
    }

    /// Canonical parameter store.
    fn var_store(&self) -> &nn::VarStore;

    /// Canonical parameter store, mutable.
    fn var_store_mut(&mut self) -> &mut nn::VarStore;
}
