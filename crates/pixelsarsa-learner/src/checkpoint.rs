//! Crash-safe snapshots of a learning run.
//!
//! A checkpoint is a whitespace-delimited text record:
//!
//! ```text
//! <random state as compact JSON>
//! <total frames>
//! <episodes>
//! <first reward magnitude, 0 if none yet>
//! <max feature norm>
//! <number of groups>
//! <number of translated features>
//! <per group: count, then `action weight` pairs>...
//! <`feature group` pairs>...
//! ```
//!
//! Files are replaced through [`persist::write_atomically`], so an interrupted
//! save leaves the previous checkpoint intact.

use std::{
    fs,
    io::{self, Write},
    num::{ParseFloatError, ParseIntError},
    path::{Path, PathBuf},
};

use log::{info, warn};
use pixelsarsa_vision::FeatureId;
use rand_pcg::Pcg32;

use crate::{GroupId, GroupTableError, SarsaAgent, persist};

/// Leading frame counts below this value are treated as leftovers of a partial record.
///
/// [`Checkpointer`] never saves a run that has played fewer frames, so every
/// record it writes loads regardless of the loader's save interval.
pub const FRAME_SANITY_FLOOR: u64 = 1000;

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum CheckpointError {
    #[display("invalid random state in checkpoint: {_0}")]
    #[from]
    Rng(serde_json::Error),
    #[display("checkpoint ended early")]
    Truncated,
    #[display("invalid integer in checkpoint: {_0}")]
    #[from]
    Int(ParseIntError),
    #[display("invalid number in checkpoint: {_0}")]
    #[from]
    Float(ParseFloatError),
    #[display("inconsistent group table in checkpoint: {_0}")]
    #[from]
    Groups(GroupTableError),
    #[display("checkpoint has a weight for action {action}, but only {num_actions} actions exist")]
    ActionOutOfRange { action: usize, num_actions: usize },
}

/// Everything needed to resume learning.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub rng: Pcg32,
    pub total_frames: u64,
    pub episodes: u64,
    pub first_reward: Option<f64>,
    pub max_feature_norm: usize,
    /// Non-zero `(action, weight)` pairs of each group, indexed by group.
    pub group_weights: Vec<Vec<(usize, f32)>>,
    pub translation: Vec<(FeatureId, GroupId)>,
}

impl Checkpoint {
    pub fn write<W>(&self, w: &mut W) -> io::Result<()>
    where
        W: Write,
    {
        writeln!(w, "{}", serde_json::to_string(&self.rng)?)?;
        writeln!(w, "{}", self.total_frames)?;
        writeln!(w, "{}", self.episodes)?;
        writeln!(w, "{}", self.first_reward.unwrap_or(0.0))?;
        writeln!(w, "{}", self.max_feature_norm)?;
        writeln!(w, "{}", self.group_weights.len())?;
        writeln!(w, "{}", self.translation.len())?;
        for weights in &self.group_weights {
            write!(w, "{}", weights.len())?;
            for (action, weight) in weights {
                write!(w, " {action} {weight}")?;
            }
            writeln!(w)?;
        }
        for (feature, group) in &self.translation {
            writeln!(w, "{feature} {group}")?;
        }
        Ok(())
    }

    /// Parses a record, skipping leading frame counts below `frame_floor`.
    pub fn parse(text: &str, frame_floor: u64) -> Result<Self, CheckpointError> {
        let mut tokens = text.split_whitespace();
        let mut next = || tokens.next().ok_or(CheckpointError::Truncated);

        let rng = serde_json::from_str::<Pcg32>(next()?)?;
        let mut total_frames = next()?.parse::<u64>()?;
        while total_frames < frame_floor {
            warn!("skipping implausible checkpoint frame count {total_frames}");
            total_frames = next()?.parse::<u64>()?;
        }
        let episodes = next()?.parse::<u64>()?;
        let first_reward = next()?.parse::<f64>()?;
        let max_feature_norm = next()?.parse::<usize>()?;
        let num_groups = next()?.parse::<usize>()?;
        let num_translated = next()?.parse::<usize>()?;

        let mut group_weights = Vec::with_capacity(num_groups);
        for _ in 0..num_groups {
            let count = next()?.parse::<usize>()?;
            let weights = (0..count)
                .map(|_| -> Result<_, CheckpointError> {
                    Ok((next()?.parse::<usize>()?, next()?.parse::<f32>()?))
                })
                .collect::<Result<Vec<_>, CheckpointError>>()?;
            group_weights.push(weights);
        }

        let translation = (0..num_translated)
            .map(|_| -> Result<_, CheckpointError> {
                let feature = next()?.parse::<FeatureId>()?;
                let group = next()?.parse::<usize>()?;
                Ok((feature, GroupId::new(group)))
            })
            .collect::<Result<Vec<_>, CheckpointError>>()?;

        Ok(Self {
            rng,
            total_frames,
            episodes,
            first_reward: (first_reward != 0.0).then_some(first_reward),
            max_feature_norm,
            group_weights,
            translation,
        })
    }

    pub fn save<P>(&self, path: P) -> io::Result<()>
    where
        P: AsRef<Path>,
    {
        persist::write_atomically(path, |w| self.write(w))
    }

    /// Loads the checkpoint at `path`; a file that cannot be read yields `Ok(None)`.
    pub fn load<P>(path: P, frame_floor: u64) -> Result<Option<Self>, CheckpointError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, frame_floor).map(Some),
            Err(err) => {
                warn!("no checkpoint loaded from {}: {err}", path.display());
                Ok(None)
            }
        }
    }
}

/// Saves the agent each time its frame count passes another multiple of the interval,
/// once at least [`FRAME_SANITY_FLOOR`] frames have been played.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    path: PathBuf,
    save_every_frames: u64,
    next_threshold: u64,
}

impl Checkpointer {
    /// # Panics
    ///
    /// Panics if `save_every_frames` is zero.
    #[must_use]
    pub fn new<P>(path: P, save_every_frames: u64) -> Self
    where
        P: Into<PathBuf>,
    {
        assert!(save_every_frames > 0, "checkpoint interval must be positive");
        Self {
            path: path.into(),
            save_every_frames,
            next_threshold: save_every_frames,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn next_threshold(&self) -> u64 {
        self.next_threshold
    }

    /// Restores `agent` from the checkpoint file if there is one.
    ///
    /// Returns whether a checkpoint was restored.
    pub fn resume(&mut self, agent: &mut SarsaAgent) -> Result<bool, CheckpointError> {
        let restored = match Checkpoint::load(&self.path, FRAME_SANITY_FLOOR)? {
            Some(checkpoint) => {
                agent.restore(checkpoint)?;
                info!(
                    "resumed from {} at {} frames, {} episodes, {} groups",
                    self.path.display(),
                    agent.total_frames(),
                    agent.episodes(),
                    agent.groups().num_groups()
                );
                true
            }
            None => false,
        };
        self.advance_past(agent.total_frames());
        Ok(restored)
    }

    /// Saves `agent` if it has passed the current threshold; returns whether it saved.
    pub fn maybe_save(&mut self, agent: &SarsaAgent) -> io::Result<bool> {
        let frames = agent.total_frames();
        if frames <= self.next_threshold || frames < FRAME_SANITY_FLOOR {
            return Ok(false);
        }
        agent.to_checkpoint().save(&self.path)?;
        info!(
            "checkpoint saved to {} at {} frames",
            self.path.display(),
            agent.total_frames()
        );
        self.advance_past(frames);
        Ok(true)
    }

    /// Moves the threshold to the first multiple of the interval above `frames`.
    fn advance_past(&mut self, frames: u64) {
        self.next_threshold = (frames / self.save_every_frames + 1) * self.save_every_frames;
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng as _, SeedableRng as _};

    use super::*;
    use crate::{SarsaParams, sarsa::tests as fixtures};

    fn trained_agent(frames: u64) -> SarsaAgent {
        let mut env = fixtures::Corridor::new(40);
        let mut features = fixtures::corridor_features();
        let mut agent = SarsaAgent::new(2, SarsaParams::default(), 21);
        agent
            .learn(&mut env, &mut features, &fixtures::schedule(frames), None, |_| {})
            .unwrap();
        agent
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint");
        let agent = trained_agent(1500);
        let saved = agent.to_checkpoint();
        saved.save(&path).unwrap();

        let loaded = Checkpoint::load(&path, FRAME_SANITY_FLOOR).unwrap().unwrap();
        assert_eq!(loaded, saved);

        let mut restored = SarsaAgent::new(2, SarsaParams::default(), 99);
        restored.restore(loaded).unwrap();
        assert_eq!(restored.to_checkpoint(), saved);
        for group in (0..agent.groups().num_groups()).map(GroupId::new) {
            for action in 0..2 {
                assert_eq!(
                    restored.table().weight(action, group),
                    agent.table().weight(action, group)
                );
            }
        }

        let mut original_rng = saved.rng.clone();
        let mut restored_rng = restored.to_checkpoint().rng;
        assert_eq!(original_rng.random::<u64>(), restored_rng.random::<u64>());
    }

    #[test]
    fn test_leading_partial_frame_counts_are_skipped() {
        let rng = serde_json::to_string(&Pcg32::seed_from_u64(4)).unwrap();
        let text = format!("{rng}\n12\n7\n5000\n3\n0.5\n9\n1\n1\n1 0 0.25\n42 0\n");
        let checkpoint = Checkpoint::parse(&text, FRAME_SANITY_FLOOR).unwrap();
        assert_eq!(checkpoint.total_frames, 5000);
        assert_eq!(checkpoint.episodes, 3);
        assert_eq!(checkpoint.first_reward, Some(0.5));
        assert_eq!(checkpoint.max_feature_norm, 9);
        assert_eq!(checkpoint.group_weights, vec![vec![(0, 0.25)]]);
        assert_eq!(checkpoint.translation, vec![(42, GroupId::new(0))]);
    }

    #[test]
    fn test_missing_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(dir.path().join("absent"), 500);
        let mut agent = SarsaAgent::new(2, SarsaParams::default(), 1);
        assert!(!checkpointer.resume(&mut agent).unwrap());
        assert_eq!(checkpointer.next_threshold(), 500);
    }

    #[test]
    fn test_truncated_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint");
        let mut text = Vec::new();
        trained_agent(1200).to_checkpoint().write(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        fs::write(&path, &text[..text.len() / 2]).unwrap();
        assert!(Checkpoint::load(&path, FRAME_SANITY_FLOOR).is_err());
    }

    #[test]
    fn test_checkpointer_saves_past_threshold_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint");
        let mut env = fixtures::Corridor::new(40);
        let mut features = fixtures::corridor_features();
        let mut agent = SarsaAgent::new(2, SarsaParams::default(), 5);
        let mut checkpointer = Checkpointer::new(&path, 200);
        assert!(!checkpointer.resume(&mut agent).unwrap());
        agent
            .learn(
                &mut env,
                &mut features,
                &fixtures::schedule(1300),
                Some(&mut checkpointer),
                |_| {},
            )
            .unwrap();
        assert!(path.exists());
        let saved = Checkpoint::load(&path, FRAME_SANITY_FLOOR).unwrap().unwrap();
        assert!(saved.total_frames >= FRAME_SANITY_FLOOR);
        assert!(checkpointer.next_threshold() > saved.total_frames);

        let mut resumed = SarsaAgent::new(2, SarsaParams::default(), 0);
        let mut checkpointer = Checkpointer::new(&path, 200);
        assert!(checkpointer.resume(&mut resumed).unwrap());
        assert_eq!(resumed.total_frames(), saved.total_frames);
        assert_eq!(
            checkpointer.next_threshold(),
            (saved.total_frames / 200 + 1) * 200
        );
    }

    #[test]
    fn test_short_runs_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint");
        let mut env = fixtures::Corridor::new(40);
        let mut features = fixtures::corridor_features();
        let mut agent = SarsaAgent::new(2, SarsaParams::default(), 5);
        let mut checkpointer = Checkpointer::new(&path, 100);
        agent
            .learn(
                &mut env,
                &mut features,
                &fixtures::schedule(600),
                Some(&mut checkpointer),
                |_| {},
            )
            .unwrap();
        assert!(agent.total_frames() < FRAME_SANITY_FLOOR);
        assert!(!path.exists());
    }

    #[test]
    fn test_resume_ignores_the_loader_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint");
        let mut env = fixtures::Corridor::new(40);
        let mut features = fixtures::corridor_features();
        let mut agent = SarsaAgent::new(2, SarsaParams::default(), 8);
        let mut checkpointer = Checkpointer::new(&path, 200);
        agent
            .learn(
                &mut env,
                &mut features,
                &fixtures::schedule(1300),
                Some(&mut checkpointer),
                |_| {},
            )
            .unwrap();
        let saved = Checkpoint::load(&path, FRAME_SANITY_FLOOR).unwrap().unwrap();

        let mut fresh = SarsaAgent::new(2, SarsaParams::default(), 0);
        let mut checkpointer = Checkpointer::new(&path, 100_000);
        assert!(checkpointer.resume(&mut fresh).unwrap());
        assert_eq!(fresh.total_frames(), saved.total_frames);
        assert_eq!(fresh.to_checkpoint(), saved);
        assert_eq!(checkpointer.next_threshold(), 100_000);
    }
}
