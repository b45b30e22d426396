use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pixelsarsa_arena::{CatchAction, CatchGame, SCREEN_HEIGHT, SCREEN_WIDTH};
use pixelsarsa_learner::{RunConfig, SarsaAgent};
use pixelsarsa_vision::{FeatureExtractor, FeatureKind};

use crate::util;

use self::{evaluate::EvaluateArg, learn::LearnArg};

mod evaluate;
mod learn;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// What mode to run the program in
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Learn to play the arena game with Sarsa(λ)
    Learn(#[clap(flatten)] LearnArg),
    /// Evaluate a checkpointed agent without learning
    Evaluate(#[clap(flatten)] EvaluateArg),
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    match args.mode {
        Mode::Learn(arg) => learn::run(&arg)?,
        Mode::Evaluate(arg) => evaluate::run(&arg)?,
    }
    Ok(())
}

/// Options shared by every mode that runs the game.
#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct RunArg {
    /// Run configuration JSON file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the agent seed
    #[arg(long)]
    seed: Option<u64>,
    /// Override the feature extractor (`blob` or `tile`)
    #[arg(long)]
    features: Option<FeatureKind>,
    /// Seed of the arena game
    #[arg(long, default_value_t = 0)]
    game_seed: u64,
    /// Frame cap of a single learning episode
    #[arg(long, default_value_t = CatchGame::DEFAULT_FRAME_CAP)]
    episode_frames: u64,
}

/// A validated configuration with the game, extractor and fresh agent it describes.
pub(crate) struct Session {
    pub config: RunConfig,
    pub game: CatchGame,
    pub features: FeatureExtractor,
    pub agent: SarsaAgent,
}

impl RunArg {
    pub(crate) fn load_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = util::read_config_file(self.config.as_ref())?;
        if let Some(seed) = self.seed {
            config.schedule.seed = seed;
        }
        if let Some(kind) = self.features {
            config.features.kind = kind;
        }
        Ok(config)
    }

    pub(crate) fn open_session(&self, config: RunConfig) -> anyhow::Result<Session> {
        config.validate().context("Invalid run configuration")?;
        let features = FeatureExtractor::from_config(&config.features, SCREEN_HEIGHT, SCREEN_WIDTH)
            .context("Failed to build feature extractor")?;
        let game = CatchGame::with_frame_cap(self.game_seed, self.episode_frames);
        let agent = SarsaAgent::new(CatchAction::ALL.len(), config.sarsa, config.schedule.seed);
        Ok(Session {
            config,
            game,
            features,
            agent,
        })
    }
}
