use std::{
    fs::File,
    io::{self, StdoutLock, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context;
use pixelsarsa_learner::{RunConfig, persist};

/// Where a JSON report goes.
///
/// Files are written through a temporary sibling and renamed into place, so a
/// reader never sees a half-written report.
#[derive(Debug)]
pub enum Output {
    Stdout { writer: StdoutLock<'static> },
    File { path: PathBuf },
}

impl Output {
    pub fn save_json<T>(value: &T, output_path: Option<PathBuf>) -> anyhow::Result<()>
    where
        T: serde::Serialize,
    {
        let mut output = Output::from_output_path(output_path);
        output.write_json(value)
    }

    pub fn from_output_path(output_path: Option<PathBuf>) -> Self {
        match output_path {
            Some(path) => Output::File { path },
            None => Output::stdout(),
        }
    }

    pub fn stdout() -> Self {
        Output::Stdout {
            writer: io::stdout().lock(),
        }
    }

    pub fn display_path(&self) -> String {
        match self {
            Output::Stdout { .. } => "stdout".to_string(),
            Output::File { path } => path.display().to_string(),
        }
    }

    pub fn write_json<T>(&mut self, value: &T) -> anyhow::Result<()>
    where
        T: serde::Serialize,
    {
        let display_path = self.display_path();
        match self {
            Output::Stdout { writer } => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .with_context(|| format!("Failed to write JSON to {display_path}"))?;
                writeln!(writer)
                    .with_context(|| format!("Failed to write newline after JSON to {display_path}"))?;
                writer
                    .flush()
                    .with_context(|| format!("Failed to flush output to {display_path}"))?;
            }
            Output::File { path } => {
                persist::write_atomically(&*path, |writer| {
                    serde_json::to_writer_pretty(&mut *writer, value)?;
                    writeln!(writer)
                })
                .with_context(|| format!("Failed to write JSON to {display_path}"))?;
            }
        }
        Ok(())
    }
}

pub fn read_json_file<T, P>(file_kind: &str, path: P) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} file: {}", file_kind, path.display()))?;

    let reader = io::BufReader::new(file);
    let value = serde_json::from_reader(reader).with_context(|| {
        format!(
            "Failed to parse {} JSON file: {}",
            file_kind,
            path.display()
        )
    })?;

    Ok(value)
}

/// Reads a run configuration, or the defaults when no file is given.
pub fn read_config_file<P>(path: Option<P>) -> anyhow::Result<RunConfig>
where
    P: AsRef<Path>,
{
    match path {
        Some(path) => read_json_file("config", path),
        None => Ok(RunConfig::default()),
    }
}
