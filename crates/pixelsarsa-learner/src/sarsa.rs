//! Online Sarsa(λ) with replacing traces over grouped binary features.
//!
//! Each step of an episode goes through the same sequence:
//!
//! 1. decay every trace by `gamma * lambda` and set the traces of the active
//!    groups under the chosen action to one,
//! 2. apply the action and observe the (normalized) reward,
//! 3. extract and group the next frame's features, then pick the next action,
//! 4. move every traced weight by `alpha / max_feature_norm * delta * trace`.
//!
//! `max_feature_norm` is the largest raw feature count seen so far, so the
//! effective learning rate never grows.

use std::{io, mem, path::Path, time::Instant};

use log::info;
use pixelsarsa_vision::{FeatureId, FeatureSet};
use rand::{Rng, SeedableRng as _};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::{
    Checkpoint, CheckpointError, Checkpointer, Environment, FeatureGroups, GroupId, ParamTable,
    ScheduleConfig, WeightsError, weights_file,
};

/// Q-values above this magnitude are treated as divergence.
pub const DIVERGENCE_LIMIT: f32 = 1e8;

/// Q-values this close to the maximum tie with it.
const TIE_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarsaParams {
    pub alpha: f32,
    pub gamma: f32,
    pub lambda: f32,
    pub epsilon: f32,
    pub trace_threshold: f32,
}

impl Default for SarsaParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            gamma: 0.99,
            lambda: 0.9,
            epsilon: 0.01,
            trace_threshold: 0.01,
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From, derive_more::IsVariant)]
pub enum LearnError {
    #[display("learning diverged: Q-value of action {action} is {value}")]
    Diverged { action: usize, value: f32 },
    #[display("failed to save checkpoint: {_0}")]
    #[from]
    Checkpoint(io::Error),
}

/// Result of one finished learning episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: u64,
    pub score: f64,
    pub frames: u64,
    pub fps: f64,
}

/// Returns an error naming the first action whose value is NaN or too large.
pub fn check_divergence(q: &[f32]) -> Result<(), LearnError> {
    match q
        .iter()
        .enumerate()
        .find(|(_, value)| value.is_nan() || value.abs() > DIVERGENCE_LIMIT)
    {
        Some((action, &value)) => Err(LearnError::Diverged { action, value }),
        None => Ok(()),
    }
}

/// Picks a greedy action, breaking near-ties uniformly at random; with
/// probability `epsilon` picks a uniformly random action instead.
pub fn epsilon_greedy<R>(rng: &mut R, q: &[f32], epsilon: f32) -> usize
where
    R: Rng + ?Sized,
{
    let action = argmax(rng, q);
    if rng.random::<f32>() < epsilon {
        rng.random_range(0..q.len())
    } else {
        action
    }
}

fn argmax<R>(rng: &mut R, q: &[f32]) -> usize
where
    R: Rng + ?Sized,
{
    let max = q.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let is_tie = |value: &f32| (max - value).abs() < TIE_TOLERANCE;
    let ties = q.iter().filter(|value| is_tie(value)).count();
    let pick = match ties {
        0 | 1 => 0,
        _ => rng.random_range(0..ties),
    };
    q.iter()
        .enumerate()
        .filter(|(_, value)| is_tie(value))
        .nth(pick)
        .map_or(0, |(action, _)| action)
}

/// A learning agent with its feature groups, parameters and random stream.
#[derive(Debug, Clone)]
pub struct SarsaAgent {
    params: SarsaParams,
    rng: Pcg32,
    groups: FeatureGroups,
    table: ParamTable,
    max_feature_norm: usize,
    learning_rate: f32,
    first_reward: Option<f64>,
    total_frames: u64,
    episodes: u64,
    raw: Vec<FeatureId>,
    raw_next: Vec<FeatureId>,
    active: Vec<GroupId>,
    active_next: Vec<GroupId>,
    q: Vec<f32>,
    q_next: Vec<f32>,
}

impl SarsaAgent {
    #[must_use]
    pub fn new(num_actions: usize, params: SarsaParams, seed: u64) -> Self {
        Self {
            params,
            rng: Pcg32::seed_from_u64(seed),
            groups: FeatureGroups::new(),
            table: ParamTable::new(num_actions, params.trace_threshold),
            max_feature_norm: 1,
            learning_rate: params.alpha,
            first_reward: None,
            total_frames: 0,
            episodes: 0,
            raw: Vec::new(),
            raw_next: Vec::new(),
            active: Vec::new(),
            active_next: Vec::new(),
            q: Vec::with_capacity(num_actions),
            q_next: Vec::with_capacity(num_actions),
        }
    }

    #[must_use]
    pub fn params(&self) -> &SarsaParams {
        &self.params
    }

    #[must_use]
    pub fn num_actions(&self) -> usize {
        self.table.num_actions()
    }

    #[must_use]
    pub fn groups(&self) -> &FeatureGroups {
        &self.groups
    }

    #[must_use]
    pub fn table(&self) -> &ParamTable {
        &self.table
    }

    /// Frames learned from so far, excluding no-op starts.
    #[must_use]
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    #[must_use]
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    #[must_use]
    pub fn max_feature_norm(&self) -> usize {
        self.max_feature_norm
    }

    #[must_use]
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    #[must_use]
    pub fn first_reward(&self) -> Option<f64> {
        self.first_reward
    }

    /// Learns until `schedule.learning_frames` frames have been played.
    ///
    /// `on_episode` is called after every episode; `checkpointer` is consulted
    /// after every episode.
    pub fn learn<E, F, O>(
        &mut self,
        env: &mut E,
        features: &mut F,
        schedule: &ScheduleConfig,
        mut checkpointer: Option<&mut Checkpointer>,
        mut on_episode: O,
    ) -> Result<(), LearnError>
    where
        E: Environment,
        F: FeatureSet + ?Sized,
        O: FnMut(&EpisodeSummary),
    {
        assert_eq!(
            env.legal_actions().len(),
            self.num_actions(),
            "agent and environment disagree on the number of actions"
        );
        while self.total_frames < schedule.learning_frames {
            let summary = self.learn_episode(env, features, schedule)?;
            on_episode(&summary);
            if let Some(checkpointer) = checkpointer.as_deref_mut() {
                checkpointer.maybe_save(self)?;
            }
        }
        Ok(())
    }

    #[expect(clippy::cast_precision_loss)]
    fn learn_episode<E, F>(
        &mut self,
        env: &mut E,
        features: &mut F,
        schedule: &ScheduleConfig,
    ) -> Result<EpisodeSummary, LearnError>
    where
        E: Environment,
        F: FeatureSet + ?Sized,
    {
        let SarsaParams {
            gamma, lambda, epsilon, ..
        } = self.params;

        self.episodes += 1;
        env.reset();
        self.no_op_start(env, schedule);
        let start_frames = env.episode_frames();
        let started = Instant::now();
        let mut score = 0.0;

        self.table.clear_traces();
        features.active_features(env.screen(), env.ram(), &mut self.raw);
        self.groups
            .group_frame(&self.raw, &mut self.table, &mut self.active);
        self.table.q_values(&self.active, &self.groups, &mut self.q);
        let mut action = epsilon_greedy(&mut self.rng, &self.q, epsilon);

        while !env.is_terminal() {
            self.table.q_values(&self.active, &self.groups, &mut self.q);
            self.table.decay_traces(gamma * lambda);
            self.table.replace_traces(action, &self.active);
            check_divergence(&self.q)?;

            let chosen = env.legal_actions()[action];
            let step = env.step(chosen);
            score += step.reward;
            let reward = self.normalize_reward(step.reward);

            let next_action = if step.terminal || env.is_terminal() {
                self.q_next.clear();
                self.q_next.resize(self.num_actions(), 0.0);
                0
            } else {
                features.active_features(env.screen(), env.ram(), &mut self.raw_next);
                self.groups
                    .group_frame(&self.raw_next, &mut self.table, &mut self.active_next);
                self.table
                    .q_values(&self.active_next, &self.groups, &mut self.q_next);
                epsilon_greedy(&mut self.rng, &self.q_next, epsilon)
            };

            if self.raw.len() > self.max_feature_norm {
                self.max_feature_norm = self.raw.len();
                self.learning_rate = self.params.alpha / self.max_feature_norm as f32;
            }
            let delta = reward + gamma * self.q_next[next_action] - self.q[action];
            self.table.update_weights(self.learning_rate * delta);

            mem::swap(&mut self.raw, &mut self.raw_next);
            mem::swap(&mut self.active, &mut self.active_next);
            action = next_action;
        }

        let frames = env.episode_frames();
        self.total_frames += frames.saturating_sub(start_frames);
        features.clear_temporal_cache();

        let elapsed = started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            frames as f64 / elapsed
        } else {
            0.0
        };
        info!(
            "episode {}: {score} points, {frames} frames, {fps:.0} fps, {} groups",
            self.episodes,
            self.groups.num_groups()
        );
        Ok(EpisodeSummary {
            episode: self.episodes,
            score,
            frames,
            fps,
        })
    }

    /// Plays `schedule.eval_episodes` episodes with frozen parameters and returns their scores.
    pub fn evaluate<E, F>(&mut self, env: &mut E, features: &mut F, schedule: &ScheduleConfig) -> Vec<f64>
    where
        E: Environment,
        F: FeatureSet + ?Sized,
    {
        (1..=schedule.eval_episodes)
            .map(|episode| {
                let score = self.evaluate_episode(env, features, schedule);
                info!("evaluation episode {episode}: {score} points");
                score
            })
            .collect()
    }

    fn evaluate_episode<E, F>(&mut self, env: &mut E, features: &mut F, schedule: &ScheduleConfig) -> f64
    where
        E: Environment,
        F: FeatureSet + ?Sized,
    {
        env.reset();
        features.clear_temporal_cache();
        self.no_op_start(env, schedule);

        let mut score = 0.0;
        let mut steps = 0;
        while !env.is_terminal() && steps < schedule.eval_episode_length {
            features.active_features(env.screen(), env.ram(), &mut self.raw);
            self.table
                .frozen_q_values(&self.raw, &self.groups, &mut self.q);
            let action = epsilon_greedy(&mut self.rng, &self.q, self.params.epsilon);
            let chosen = env.legal_actions()[action];
            score += env.step(chosen).reward;
            steps += 1;
        }
        features.clear_temporal_cache();
        score
    }

    fn no_op_start<E>(&mut self, env: &mut E, schedule: &ScheduleConfig)
    where
        E: Environment,
    {
        if !schedule.random_no_op {
            return;
        }
        // at least one no-op, also for an unvalidated zero maximum
        let count = self.rng.random_range(1..=schedule.no_op_max.max(1));
        let no_op = env.legal_actions()[0];
        for _ in 0..count {
            if env.is_terminal() {
                break;
            }
            env.step(no_op);
        }
    }

    /// Scales rewards by the magnitude of the first non-zero reward of the run.
    #[expect(clippy::cast_possible_truncation)]
    fn normalize_reward(&mut self, reward: f64) -> f32 {
        if reward == 0.0 {
            return 0.0;
        }
        let scale = *self.first_reward.get_or_insert(reward.abs());
        (reward / scale) as f32
    }

    /// Snapshot of everything needed to resume learning.
    #[must_use]
    pub fn to_checkpoint(&self) -> Checkpoint {
        let group_weights = (0..self.groups.num_groups())
            .map(|index| self.table.nonzero_weights(GroupId::new(index)).collect())
            .collect();
        let mut translation = self.groups.translation().collect::<Vec<_>>();
        translation.sort_unstable();
        Checkpoint {
            rng: self.rng.clone(),
            total_frames: self.total_frames,
            episodes: self.episodes,
            first_reward: self.first_reward,
            max_feature_norm: self.max_feature_norm,
            group_weights,
            translation,
        }
    }

    /// Replaces the weights with those of a weights file written for the current group table.
    ///
    /// The file is only meaningful next to the translation table it was saved with, so
    /// its group count must match the agent's; restore the matching checkpoint first.
    /// Returns `Ok(false)` and keeps the current weights if no file exists at `path`.
    pub fn load_weights<P>(&mut self, path: P) -> Result<bool, WeightsError>
    where
        P: AsRef<Path>,
    {
        weights_file::load_weights(path, &mut self.table)
    }

    /// Replaces the learned state with `checkpoint`. Traces start cleared.
    #[expect(clippy::cast_precision_loss)]
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let num_actions = self.num_actions();
        let groups =
            FeatureGroups::from_translation(checkpoint.group_weights.len(), checkpoint.translation)?;
        let mut table = ParamTable::new(num_actions, self.params.trace_threshold);
        table.grow_to(groups.num_groups());
        for (index, weights) in checkpoint.group_weights.iter().enumerate() {
            for &(action, weight) in weights {
                if action >= num_actions {
                    return Err(CheckpointError::ActionOutOfRange {
                        action,
                        num_actions,
                    });
                }
                table.set_weight(action, GroupId::new(index), weight);
            }
        }

        self.rng = checkpoint.rng;
        self.groups = groups;
        self.table = table;
        self.max_feature_norm = checkpoint.max_feature_norm.max(1);
        self.learning_rate = self.params.alpha / self.max_feature_norm as f32;
        self.first_reward = checkpoint.first_reward;
        self.total_frames = checkpoint.total_frames;
        self.episodes = checkpoint.episodes;
        Ok(())
    }
}
