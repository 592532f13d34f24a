//! Environment families and wrapper interfaces.
//!
//! Provides:
//! - `EnvWrapper` - what a single rollout needs from an environment
//! - `EnvFactory` - constructs per-episode environment instances
//! - `EvalSetup` - closed tagged union of evaluation families, chosen at
//!   configuration time (never by matching environment id strings at runtime)
//! - Task and rephrasal registries for the task-suite and
//!   rephrasal-instruction families

use crate::Result;
use ndarray::ArrayD;

/// One RGB frame captured during a rollout.
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Result of one environment step.
#[derive(Clone, Debug)]
pub struct EnvStep {
    pub observation: ArrayD<f32>,
    pub reward: f64,
    pub done: bool,
    pub success: bool,
}

/// Minimal environment surface consumed by the rollout routine.
///
/// Simulator internals are opaque; each family's wrapper adapts reset/step
/// and exposes the spoken instruction for language conditioning.
pub trait EnvWrapper: Send {
    fn reset(&mut self, seed: Option<u64>) -> Result<ArrayD<f32>>;

    fn step(&mut self, action: &ArrayD<f32>) -> Result<EnvStep>;

    /// The natural-language instruction for the current episode ("" if none).
    fn instruction(&self) -> String;

    /// Capture the current frame, when the environment can render.
    fn render_frame(&self) -> Option<Frame> {
        None
    }
}

/// What the dispatcher asks a factory for when starting an episode.
#[derive(Clone, Debug, Default)]
pub struct EpisodeRequest<'a> {
    pub seed: Option<u64>,
    /// Task name, for the task-suite family.
    pub task: Option<&'a str>,
    /// Concrete phrasing, for the rephrasal family.
    pub instruction: Option<&'a str>,
    /// Canonical instruction the phrasing rephrases.
    pub canonical: Option<&'a str>,
}

impl<'a> EpisodeRequest<'a> {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn for_task(task: &'a str, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            task: Some(task),
            ..Self::default()
        }
    }

    pub fn for_instruction(instruction: &'a str, canonical: &'a str) -> Self {
        Self {
            instruction: Some(instruction),
            canonical: Some(canonical),
            ..Self::default()
        }
    }
}

/// Constructs a fresh environment instance per episode.
pub trait EnvFactory: Send {
    fn create(&self, request: &EpisodeRequest) -> Result<Box<dyn EnvWrapper>>;
}

/// Lexical category of an instruction rephrasal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RephrasalKind {
    Seen,
    UnseenVerb,
    UnseenNoun,
    UnseenVerbNoun,
    Human,
}

impl RephrasalKind {
    pub const ALL: [RephrasalKind; 5] = [
        RephrasalKind::Seen,
        RephrasalKind::UnseenVerb,
        RephrasalKind::UnseenNoun,
        RephrasalKind::UnseenVerbNoun,
        RephrasalKind::Human,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RephrasalKind::Seen => "seen",
            RephrasalKind::UnseenVerb => "unseen verb",
            RephrasalKind::UnseenNoun => "unseen noun",
            RephrasalKind::UnseenVerbNoun => "unseen verb noun",
            RephrasalKind::Human => "human",
        }
    }
}

/// One canonical instruction and its rephrasals, grouped by category.
#[derive(Clone, Debug)]
pub struct RephrasalEntry {
    pub canonical: String,
    pub variants: Vec<(RephrasalKind, Vec<String>)>,
}

/// The instruction registry for the rephrasal-instruction family.
#[derive(Clone, Debug, Default)]
pub struct RephrasalSet {
    pub entries: Vec<RephrasalEntry>,
}

impl RephrasalSet {
    /// Total number of concrete phrasings across all entries.
    pub fn num_phrasings(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|e| e.variants.iter())
            .map(|(_, phrasings)| phrasings.len())
            .sum()
    }
}

/// A small default rephrasal registry for demos and tests.
pub fn default_rephrasal_set() -> RephrasalSet {
    let entry = |canonical: &str, variants: Vec<(RephrasalKind, Vec<&str>)>| RephrasalEntry {
        canonical: canonical.to_string(),
        variants: variants
            .into_iter()
            .map(|(kind, list)| (kind, list.into_iter().map(str::to_string).collect()))
            .collect(),
    };

    RephrasalSet {
        entries: vec![
            entry(
                "open drawer",
                vec![
                    (RephrasalKind::Seen, vec!["open drawer"]),
                    (RephrasalKind::UnseenVerb, vec!["pull drawer"]),
                    (RephrasalKind::UnseenNoun, vec!["open container"]),
                    (RephrasalKind::UnseenVerbNoun, vec!["pull container"]),
                    (RephrasalKind::Human, vec!["slide the drawer out"]),
                ],
            ),
            entry(
                "turn faucet right",
                vec![
                    (RephrasalKind::Seen, vec!["turn faucet right"]),
                    (RephrasalKind::UnseenVerb, vec!["rotate faucet right"]),
                    (RephrasalKind::UnseenNoun, vec!["turn tap right"]),
                    (RephrasalKind::UnseenVerbNoun, vec!["rotate tap right"]),
                    (RephrasalKind::Human, vec!["twist the faucet clockwise"]),
                ],
            ),
        ],
    }
}

/// Default task registry for the task-suite family.
pub fn default_task_registry() -> Vec<String> {
    [
        "reach",
        "push",
        "pick-place",
        "door-open",
        "drawer-open",
        "drawer-close",
        "button-press",
        "window-open",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Which evaluation procedure runs, fixed at configuration time.
///
/// Exactly one family is active per run; `HeldOut` is the fallback when no
/// environment is configured and evaluates losses on a validation split.
pub enum EvalSetup {
    TaskSuite { tasks: Vec<String> },
    GridInstruction,
    RephrasalInstruction { instructions: RephrasalSet },
    Generic,
    HeldOut,
}

impl EvalSetup {
    /// Whether this setup needs an environment factory.
    pub fn needs_factory(&self) -> bool {
        !matches!(self, EvalSetup::HeldOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rephrasal_set_counts() {
        let set = default_rephrasal_set();
        assert_eq!(set.entries.len(), 2);
        assert_eq!(set.num_phrasings(), 10);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(RephrasalKind::UnseenVerbNoun.label(), "unseen verb noun");
        assert_eq!(RephrasalKind::ALL.len(), 5);
    }

    #[test]
    fn test_setup_factory_requirements() {
        assert!(EvalSetup::Generic.needs_factory());
        assert!(!EvalSetup::HeldOut.needs_factory());
    }
}
