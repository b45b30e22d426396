use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use log::info;
use pixelsarsa_learner::{Checkpointer, FRAME_SANITY_FLOOR, save_weights};

use crate::{
    schema::report::{EvaluationReport, LearningReport},
    util::Output,
};

use super::{RunArg, Session};

#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct LearnArg {
    #[clap(flatten)]
    run: RunArg,
    /// Override the learning frame budget
    #[arg(long)]
    frames: Option<u64>,
    /// Checkpoint file to resume from and save to
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Write the final weight table to this file
    #[arg(long)]
    weights: Option<PathBuf>,
    /// Output file path for the learning report
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(crate) fn run(arg: &LearnArg) -> anyhow::Result<()> {
    let LearnArg {
        run,
        frames,
        checkpoint,
        weights,
        output,
    } = arg;

    let mut config = run.load_config()?;
    if let Some(frames) = frames {
        config.schedule.learning_frames = *frames;
    }
    let Session {
        config,
        mut game,
        mut features,
        mut agent,
    } = run.open_session(config)?;

    let mut checkpointer = checkpoint
        .as_ref()
        .map(|path| Checkpointer::new(path, config.schedule.save_every_frames));
    if let Some(checkpointer) = &mut checkpointer {
        checkpointer.resume(&mut agent).with_context(|| {
            format!(
                "Failed to restore checkpoint: {}",
                checkpointer.path().display()
            )
        })?;
    }

    let mut episodes = Vec::new();
    agent
        .learn(
            &mut game,
            &mut features,
            &config.schedule,
            checkpointer.as_mut(),
            |summary| episodes.push(*summary),
        )
        .context("Learning aborted")?;
    info!(
        "learning finished after {} frames in {} episodes",
        agent.total_frames(),
        agent.episodes()
    );

    let scores = agent.evaluate(&mut game, &mut features, &config.schedule);
    let evaluation = EvaluationReport::from_scores(scores);
    info!("evaluation mean score: {:.3}", evaluation.mean);

    // a final checkpoint keeps the weights file paired with the saved group table
    let final_checkpoint = checkpointer
        .as_ref()
        .filter(|_| agent.total_frames() >= FRAME_SANITY_FLOOR);
    if let Some(checkpointer) = final_checkpoint {
        let path = checkpointer.path();
        agent
            .to_checkpoint()
            .save(path)
            .with_context(|| format!("Failed to save checkpoint: {}", path.display()))?;
    }

    if let Some(path) = weights {
        save_weights(path, agent.table())
            .with_context(|| format!("Failed to write weights file: {}", path.display()))?;
        info!("weights saved to {}", path.display());
    }

    let report = LearningReport {
        trained_at: Utc::now(),
        total_frames: agent.total_frames(),
        num_groups: agent.groups().num_groups(),
        num_mapped_features: agent.groups().num_mapped(),
        config,
        episodes,
        evaluation,
    };
    Output::save_json(&report, output.clone())?;
    if let Some(path) = output {
        info!("learning report saved to {}", path.display());
    }

    Ok(())
}
