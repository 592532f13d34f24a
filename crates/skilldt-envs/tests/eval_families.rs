//! End-to-end dispatch over the toy environments: one test per evaluation
//! family, plus rendering and the trainer's evaluation cadence.

use skilldt::data::{ActionSeq, Trajectory, TrajectoryDataset};
use skilldt::env::{default_rephrasal_set, EvalSetup};
use skilldt::model::{PolicyMethod, ReferencePolicyConfig};
use skilldt::prelude::*;
use tch::Device;

fn discrete_policy() -> ReferencePolicy {
    ReferencePolicy::new(
        Device::Cpu,
        ReferencePolicyConfig {
            state_dim: 4,
            act_dim: 4,
            discrete: true,
            hidden_size: 16,
            vocab_size: 256,
            method: PolicyMethod::Option,
            horizon: 5,
            num_options: 4,
            use_vq: true,
            ..Default::default()
        },
    )
}

fn discrete_dataset() -> TrajectoryDataset {
    skilldt::data::synthetic_dataset(6, 5, 4, 4, 3).unwrap()
}

fn test_config(render_path: &str) -> TrainerConfig {
    TrainerConfig {
        batch_size: 4,
        chunk_length: 5,
        num_eval_episodes: 2,
        eval_episode_factor: 2,
        render_freq: 1,
        render_path: render_path.to_string(),
        progress: false,
        eval_every: 1,
        ..Default::default()
    }
}

#[test]
fn grid_instruction_family_reports_rollout_metrics() {
    let trainer = Trainer::new(
        discrete_policy(),
        Box::new(HashTokenizer::new(256)),
        discrete_dataset(),
        test_config("unused"),
    )
    .unwrap()
    .with_eval_setup(EvalSetup::GridInstruction)
    .with_env_factory(Box::new(skilldt_envs::InstructionGridFactory));

    let metrics = trainer.evaluate(1, false).unwrap();
    assert!(metrics.contains_key("success_rate"));
    assert!(metrics.contains_key("return_mean"));
    assert!(metrics.contains_key("length_mean"));
    // VQ option selector -> token usage diagnostic
    assert!(metrics.contains_key("token_usage"));
}

#[test]
fn task_suite_family_reports_per_task_histogram() {
    let tasks = vec!["reach".to_string(), "push".to_string()];
    let trainer = Trainer::new(
        discrete_policy(),
        Box::new(HashTokenizer::new(256)),
        discrete_dataset(),
        test_config("unused"),
    )
    .unwrap()
    .with_eval_setup(EvalSetup::TaskSuite {
        tasks: tasks.clone(),
    })
    .with_env_factory(Box::new(skilldt_envs::GoalReachFactory));

    let metrics = trainer.evaluate(1, false).unwrap();
    assert!(metrics.contains_key("success_std"));
    match &metrics["task_wise"] {
        MetricValue::Histogram(bars) => {
            assert_eq!(bars.len(), tasks.len());
        }
        other => panic!("expected histogram, got {other:?}"),
    }
}

#[test]
fn rephrasal_family_reports_category_histograms() {
    let trainer = Trainer::new(
        discrete_policy(),
        Box::new(HashTokenizer::new(256)),
        discrete_dataset(),
        test_config("unused"),
    )
    .unwrap()
    .with_eval_setup(EvalSetup::RephrasalInstruction {
        instructions: default_rephrasal_set(),
    })
    .with_env_factory(Box::new(skilldt_envs::RephrasalReachFactory));

    let metrics = trainer.evaluate(1, false).unwrap();
    assert!(metrics.contains_key("dist_mean"));
    match &metrics["rephrasal_wise"] {
        MetricValue::Histogram(bars) => {
            // all five rephrasal categories appear in the default set
            assert_eq!(bars.len(), 5);
        }
        other => panic!("expected histogram, got {other:?}"),
    }
    match &metrics["instr_wise"] {
        MetricValue::Histogram(bars) => assert_eq!(bars.len(), 2),
        other => panic!("expected histogram, got {other:?}"),
    }
}

#[test]
fn generic_family_runs_continuous_control() {
    let policy = ReferencePolicy::new(
        Device::Cpu,
        ReferencePolicyConfig {
            state_dim: 4,
            act_dim: 2,
            discrete: false,
            hidden_size: 16,
            vocab_size: 256,
            method: PolicyMethod::Vanilla,
            use_vq: false,
            ..Default::default()
        },
    );

    let trajectories = (0..4)
        .map(|i| Trajectory {
            lang: String::new(),
            states: vec![vec![0.1 * i as f32; 4]; 3],
            actions: ActionSeq::Continuous(vec![vec![0.0, 0.1]; 3]),
            dones: vec![false, false, true],
        })
        .collect();
    let dataset = TrajectoryDataset::new(trajectories, true).unwrap();

    let trainer = Trainer::new(
        policy,
        Box::new(HashTokenizer::new(256)),
        dataset,
        test_config("unused"),
    )
    .unwrap()
    .with_eval_setup(EvalSetup::Generic)
    .with_env_factory(Box::new(skilldt_envs::PointMassFactory));

    let metrics = trainer.evaluate(1, false).unwrap();
    assert!(metrics.contains_key("return_mean"));
    assert!(metrics["return_mean"].as_scalar().unwrap() <= 0.0);
}

#[test]
fn rendering_persists_episode_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let render_path = dir.path().join("renders");

    let trainer = Trainer::new(
        discrete_policy(),
        Box::new(HashTokenizer::new(256)),
        discrete_dataset(),
        test_config(render_path.to_str().unwrap()),
    )
    .unwrap()
    .with_eval_setup(EvalSetup::GridInstruction)
    .with_env_factory(Box::new(skilldt_envs::InstructionGridFactory));

    trainer.evaluate(3, true).unwrap();

    // repeat indices are 1-based; every repeat renders at render_freq 1
    assert!(render_path.join("episode_3_1.frames").exists());
    assert!(render_path.join("3_1.txt").exists());
    assert!(render_path.join("episode_3_1_options.txt").exists());
}

#[test]
fn train_iteration_merges_evaluation_metrics_on_cadence() {
    let mut trainer = Trainer::new(
        discrete_policy(),
        Box::new(HashTokenizer::new(256)),
        discrete_dataset(),
        test_config("unused"),
    )
    .unwrap()
    .with_eval_setup(EvalSetup::GridInstruction)
    .with_env_factory(Box::new(skilldt_envs::InstructionGridFactory));

    let logs = trainer.train_iteration(1, false).unwrap();
    assert!(logs.contains_key("training/train_loss_mean"));
    assert!(logs.contains_key("evaluation/success_rate"));
    assert!(logs.contains_key("time/evaluation"));
}

#[test]
fn held_out_fallback_mirrors_training_losses() {
    let trainer = Trainer::new(
        discrete_policy(),
        Box::new(HashTokenizer::new(256)),
        discrete_dataset(),
        test_config("unused"),
    )
    .unwrap()
    .with_val_dataset(skilldt::data::synthetic_dataset(4, 5, 4, 4, 9).unwrap());

    let metrics = trainer.evaluate(1, false).unwrap();
    assert!(metrics.contains_key("eval_loss_mean"));
    assert!(metrics.contains_key("action_pred_loss"));
    assert!(metrics.contains_key("state_pred_loss"));
    assert!(metrics.contains_key("action_error"));
}
