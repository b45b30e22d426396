use std::path::PathBuf;

use anyhow::Context;
use log::{info, warn};
use pixelsarsa_learner::Checkpointer;

use crate::{schema::report::EvaluationReport, util::Output};

use super::{RunArg, Session};

#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct EvaluateArg {
    #[clap(flatten)]
    run: RunArg,
    /// Checkpoint file holding the learned agent
    #[arg(long)]
    checkpoint: PathBuf,
    /// Weights file saved by the same run as the checkpoint, replacing its weights
    #[arg(long)]
    weights: Option<PathBuf>,
    /// Override the number of evaluation episodes
    #[arg(long)]
    episodes: Option<usize>,
    /// Output file path for the evaluation report
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(crate) fn run(arg: &EvaluateArg) -> anyhow::Result<()> {
    let EvaluateArg {
        run,
        checkpoint,
        weights,
        episodes,
        output,
    } = arg;

    let mut config = run.load_config()?;
    if let Some(episodes) = episodes {
        config.schedule.eval_episodes = *episodes;
    }
    let Session {
        config,
        mut game,
        mut features,
        mut agent,
    } = run.open_session(config)?;

    let mut checkpointer = Checkpointer::new(checkpoint, config.schedule.save_every_frames);
    let resumed = checkpointer
        .resume(&mut agent)
        .with_context(|| format!("Failed to restore checkpoint: {}", checkpoint.display()))?;
    if !resumed {
        warn!(
            "no usable checkpoint at {}; evaluating an untrained agent",
            checkpoint.display()
        );
    }

    if let Some(path) = weights {
        let loaded = agent
            .load_weights(path)
            .with_context(|| format!("Failed to load weights file: {}", path.display()))?;
        if loaded {
            info!("weights loaded from {}", path.display());
        }
    }

    let scores = agent.evaluate(&mut game, &mut features, &config.schedule);
    let report = EvaluationReport::from_scores(scores);
    info!("evaluation mean score: {:.3}", report.mean);
    Output::save_json(&report, output.clone())?;

    Ok(())
}
