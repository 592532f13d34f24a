//! Compact reference policy.
//!
//! A small language-conditioned sequence model with an optional
//! vector-quantized option selector. It exists so the training and
//! evaluation loops can be exercised end to end; it is not a serious
//! architecture and real models plug in through the [`Policy`] trait.

use super::{IqBatch, ModelOutput, Policy, PolicyMethod};
use crate::Result;
use tch::{nn, Device, Kind, Tensor};

#[derive(Clone, Debug)]
pub struct ReferencePolicyConfig {
    pub state_dim: i64,
    pub act_dim: i64,
    pub discrete: bool,
    pub hidden_size: i64,
    pub vocab_size: i64,
    pub max_timestep: i64,
    pub method: PolicyMethod,
    pub horizon: i64,
    pub num_options: i64,
    pub use_vq: bool,
    pub predict_q: bool,
}

impl Default for ReferencePolicyConfig {
    fn default() -> Self {
        Self {
            state_dim: 4,
            act_dim: 4,
            discrete: true,
            hidden_size: 64,
            vocab_size: 2048,
            max_timestep: 1024,
            method: PolicyMethod::Option,
            horizon: 10,
            num_options: 8,
            use_vq: true,
            predict_q: false,
        }
    }
}

pub struct ReferencePolicy {
    vs: nn::VarStore,
    config: ReferencePolicyConfig,

    embed_lang: nn::Embedding,
    embed_state: nn::Linear,
    embed_action: nn::Linear,
    embed_timestep: nn::Embedding,
    embed_ln: nn::LayerNorm,
    trunk: nn::Sequential,

    predict_action: nn::Linear,
    predict_state: nn::Linear,
    predict_q: Option<nn::Linear>,

    // Option selector (absent for Vanilla)
    option_head: Option<nn::Linear>,
    lang_option_head: Option<nn::Linear>,
    codebook: Option<Tensor>,
    decode_state: Option<nn::Linear>,
    decode_lang: Option<nn::Linear>,
}

impl ReferencePolicy {
    pub fn new(device: Device, config: ReferencePolicyConfig) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let h = config.hidden_size;

        let embed_lang = nn::embedding(
            &root / "embed_lang",
            config.vocab_size,
            h,
            Default::default(),
        );
        let embed_state = nn::linear(&root / "embed_state", config.state_dim, h, Default::default());
        let embed_action = nn::linear(&root / "embed_action", config.act_dim, h, Default::default());
        let embed_timestep = nn::embedding(
            &root / "embed_timestep",
            config.max_timestep,
            h,
            Default::default(),
        );
        let embed_ln = nn::layer_norm(&root / "embed_ln", vec![h], Default::default());

        let trunk = nn::seq()
            .add(nn::linear(&root / "trunk_fc1", h, h * 2, Default::default()))
            .add_fn(|x| x.gelu("none"))
            .add(nn::linear(&root / "trunk_fc2", h * 2, h, Default::default()));

        let predict_action = nn::linear(&root / "predict_action", h, config.act_dim, Default::default());
        let predict_state = nn::linear(&root / "predict_state", h, config.state_dim, Default::default());
        let predict_q = config
            .predict_q
            .then(|| nn::linear(&root / "predict_q", h, config.act_dim, Default::default()));

        let with_options = config.method.needs_chunking();
        let option_head = with_options
            .then(|| nn::linear(&root / "option_head", h, config.num_options, Default::default()));
        let lang_option_head = with_options.then(|| {
            nn::linear(&root / "lang_option_head", h, config.num_options, Default::default())
        });
        let codebook = (with_options && config.use_vq).then(|| {
            (&root / "option_selector").var(
                "codebook",
                &[config.num_options, h],
                nn::Init::Randn {
                    mean: 0.0,
                    stdev: 0.1,
                },
            )
        });
        let decode_state = with_options
            .then(|| nn::linear(&root / "decode_state", h, config.state_dim, Default::default()));
        let decode_lang =
            with_options.then(|| nn::linear(&root / "decode_lang", h, h, Default::default()));

        Self {
            vs,
            config,
            embed_lang,
            embed_state,
            embed_action,
            embed_timestep,
            embed_ln,
            trunk,
            predict_action,
            predict_state,
            predict_q,
            option_head,
            lang_option_head,
            codebook,
            decode_state,
            decode_lang,
        }
    }

    pub fn config(&self) -> &ReferencePolicyConfig {
        &self.config
    }

    /// Mask-weighted mean pooling over token embeddings -> `[B, H]`.
    fn pool_language(&self, token_ids: &Tensor, lang_mask: &Tensor) -> Tensor {
        let emb = token_ids.apply(&self.embed_lang);
        let mask = lang_mask.to_kind(Kind::Float).unsqueeze(-1);
        let summed = (emb * &mask).sum_dim_intlist([1i64].as_slice(), false, Kind::Float);
        let counts = mask
            .sum_dim_intlist([1i64].as_slice(), false, Kind::Float)
            .clamp_min(1.0);
        summed / counts
    }

    /// Mean entropy of a categorical distribution given logits `[.., O]`.
    fn mean_entropy(logits: &Tensor) -> Tensor {
        let p = logits.softmax(-1, Kind::Float);
        let logp = (&p + 1e-8).log();
        -(p * logp)
            .sum_dim_intlist([-1i64].as_slice(), false, Kind::Float)
            .mean(Kind::Float)
    }
}

impl Policy for ReferencePolicy {
    fn forward(
        &self,
        lang_token_ids: &Tensor,
        lang_attention_mask: &Tensor,
        states: &Tensor,
        actions: &Tensor,
        timesteps: &Tensor,
        _attention_mask: &Tensor,
    ) -> Result<ModelOutput> {
        let (b, t, _s) = states.size3()?;
        let h = self.config.hidden_size;

        let lang_ctx = self.pool_language(lang_token_ids, lang_attention_mask); // [B, H]
        let lang_ctx_time = lang_ctx.unsqueeze(1).expand([b, t, h], false);

        let clamped = timesteps.clamp(0, self.config.max_timestep - 1);
        let time_emb = clamped
            .reshape([-1])
            .apply(&self.embed_timestep)
            .reshape([b, t, h]);

        let state_emb = states.apply(&self.embed_state);
        let action_emb = actions.apply(&self.embed_action);

        let mut x = &state_emb + action_emb + time_emb + &lang_ctx_time;

        let mut options_loss = None;
        let mut commitment_loss = None;
        let mut entropy = None;
        let mut state_rc = None;
        let mut lang_rc = None;
        let mut options = None;

        if let Some(option_head) = &self.option_head {
            let option_logits = x.apply(option_head); // [B, T, O]
            let lang_logits = lang_ctx.apply(self.lang_option_head.as_ref().unwrap()); // [B, O]
            options = Some(option_logits.argmax(-1, false));

            if let Some(codebook) = &self.codebook {
                // Nearest codebook entry per step.
                let query = &state_emb + &lang_ctx_time; // [B, T, H]
                let flat_query = query.reshape([-1, h]); // [B*T, H]
                let distances = flat_query
                    .unsqueeze(1)
                    .sub(&codebook.unsqueeze(0))
                    .pow_tensor_scalar(2.0)
                    .sum_dim_intlist([-1i64].as_slice(), false, Kind::Float); // [B*T, O]
                let indices = distances.argmin(1, false); // [B*T]
                let codes = codebook.index_select(0, &indices); // [B*T, H]
                options = Some(indices.reshape([b, t]));

                // Codebook + commitment terms, straight-through estimator.
                let codebook_term = codes.mse_loss(&flat_query.detach(), tch::Reduction::Mean);
                let commit_term = flat_query.mse_loss(&codes.detach(), tch::Reduction::Mean);
                commitment_loss = Some(codebook_term + 0.25 * commit_term);

                let straight_through = &flat_query + (&codes - &flat_query).detach();
                let code_time = straight_through.reshape([b, t, h]);
                x = x + &code_time;

                // Selector head learns to predict the quantizer's choice.
                options_loss = Some(
                    option_logits
                        .reshape([-1, self.config.num_options])
                        .cross_entropy_for_logits(&indices),
                );

                state_rc = Some((
                    code_time.apply(self.decode_state.as_ref().unwrap()),
                    states.detach(),
                ));
                let code_mean = code_time.mean_dim([1i64].as_slice(), false, Kind::Float);
                lang_rc = Some((
                    code_mean.apply(self.decode_lang.as_ref().unwrap()),
                    lang_ctx.detach(),
                ));
            }

            entropy = Some((
                Self::mean_entropy(&option_logits),
                Self::mean_entropy(&lang_logits),
            ));
        }

        let x = x.apply(&self.embed_ln).apply(&self.trunk);

        let action_preds = x.apply(&self.predict_action);
        let state_preds = x.apply(&self.predict_state);
        let q_preds = self.predict_q.as_ref().map(|head| x.apply(head));

        Ok(ModelOutput {
            state_preds,
            action_preds,
            q_preds,
            options_loss,
            state_rc,
            lang_rc,
            commitment_loss,
            entropy,
            options,
        })
    }

    fn discrete(&self) -> bool {
        self.config.discrete
    }

    fn act_dim(&self) -> i64 {
        self.config.act_dim
    }

    fn state_dim(&self) -> i64 {
        self.config.state_dim
    }

    fn method(&self) -> PolicyMethod {
        self.config.method
    }

    fn horizon(&self) -> i64 {
        self.config.horizon
    }

    fn predict_q(&self) -> bool {
        self.config.predict_q
    }

    fn num_options(&self) -> i64 {
        self.config.num_options
    }

    fn use_vq(&self) -> bool {
        self.config.use_vq
    }

    fn iq_critic_loss(&self, batch: &IqBatch, step: i64) -> Option<Tensor> {
        if !self.config.predict_q {
            return None;
        }
        let gamma = 0.99;
        let q_taken = batch
            .q_preds
            .gather(1, &batch.action_targets.unsqueeze(-1), false)
            .squeeze_dim(1);
        let (next_max, _) = batch.next_q.max_dim(1, false);
        let not_done = 1.0 - batch.dones.to_kind(Kind::Float);
        let target = 1.0 + gamma * not_done * next_max;
        // Critic weight ramps in over early iterations.
        let weight = (step as f64 / 100.0).min(1.0);
        Some(weight * q_taken.mse_loss(&target.detach(), tch::Reduction::Mean))
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HashTokenizer, Tokenizer};

    fn forward_with(config: ReferencePolicyConfig) -> ModelOutput {
        let policy = ReferencePolicy::new(Device::Cpu, config.clone());
        let tok = HashTokenizer::new(config.vocab_size);
        let enc = tok
            .tokenize(&["open the drawer".into(), "push the block".into()], true)
            .unwrap();

        let b = 2;
        let t = 5;
        let states = Tensor::randn([b, t, config.state_dim], (Kind::Float, Device::Cpu));
        let actions = Tensor::randn([b, t, config.act_dim], (Kind::Float, Device::Cpu));
        let timesteps = Tensor::arange(t, (Kind::Int64, Device::Cpu))
            .unsqueeze(0)
            .expand([b, t], false);
        let mask = Tensor::ones([b, t], (Kind::Int64, Device::Cpu));

        policy
            .forward(&enc.token_ids, &enc.attention_mask, &states, &actions, &timesteps, &mask)
            .unwrap()
    }

    #[test]
    fn test_vanilla_envelope_has_no_optional_heads() {
        let out = forward_with(ReferencePolicyConfig {
            method: PolicyMethod::Vanilla,
            use_vq: false,
            ..Default::default()
        });
        assert!(out.options_loss.is_none());
        assert!(out.commitment_loss.is_none());
        assert!(out.state_rc.is_none());
        assert!(out.lang_rc.is_none());
        assert!(out.entropy.is_none());
        assert_eq!(out.action_preds.size(), vec![2, 5, 4]);
        assert_eq!(out.state_preds.size(), vec![2, 5, 4]);
    }

    #[test]
    fn test_vq_envelope_carries_all_heads() {
        let out = forward_with(ReferencePolicyConfig::default());
        assert!(out.options_loss.is_some());
        assert!(out.commitment_loss.is_some());
        assert!(out.state_rc.is_some());
        assert!(out.lang_rc.is_some());
        assert!(out.entropy.is_some());
    }

    #[test]
    fn test_q_head_present_when_enabled() {
        let out = forward_with(ReferencePolicyConfig {
            predict_q: true,
            ..Default::default()
        });
        assert_eq!(out.q_preds.unwrap().size(), vec![2, 5, 4]);
    }
}
