use std::{
    fs,
    io::{self, Write as _},
    num::{ParseFloatError, ParseIntError},
    path::Path,
};

use log::warn;

use crate::{GroupId, ParamTable, persist};

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum WeightsError {
    #[display("failed to access weights file: {_0}")]
    #[from]
    Io(io::Error),
    #[display("weights file ended early")]
    Truncated,
    #[display("invalid integer in weights file: {_0}")]
    #[from]
    Int(ParseIntError),
    #[display("invalid weight in weights file: {_0}")]
    #[from]
    Float(ParseFloatError),
    #[display("weights file is for {found} actions, expected {expected}")]
    ActionCount { found: usize, expected: usize },
    #[display("weights file is for {found} groups, expected {expected}")]
    GroupCount { found: usize, expected: usize },
    #[display("weights file entry ({action}, {group}) is out of range")]
    OutOfRange { action: usize, group: usize },
}

/// Writes the non-zero weights as a `num_actions num_groups` header followed by
/// one `action group weight` line per entry.
pub fn save_weights<P>(path: P, table: &ParamTable) -> io::Result<()>
where
    P: AsRef<Path>,
{
    persist::write_atomically(path, |w| {
        writeln!(w, "{} {}", table.num_actions(), table.num_groups())?;
        for group in (0..table.num_groups()).map(GroupId::new) {
            for (action, weight) in table.nonzero_weights(group) {
                writeln!(w, "{action} {} {weight}", group.index())?;
            }
        }
        Ok(())
    })
}

/// Replaces the weights of `table` with those written by [`save_weights`].
///
/// The file must describe exactly the actions and groups `table` already has;
/// on any error `table` is left unchanged. Returns `Ok(false)` if no weights file
/// exists at `path`.
pub fn load_weights<P>(path: P, table: &mut ParamTable) -> Result<bool, WeightsError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!("no weights at {}, keeping current weights", path.display());
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };

    let mut tokens = text.split_whitespace();
    let mut next = || tokens.next().ok_or(WeightsError::Truncated);
    let num_actions = next()?.parse::<usize>()?;
    let num_groups = next()?.parse::<usize>()?;
    if num_actions != table.num_actions() {
        return Err(WeightsError::ActionCount {
            found: num_actions,
            expected: table.num_actions(),
        });
    }
    if num_groups != table.num_groups() {
        return Err(WeightsError::GroupCount {
            found: num_groups,
            expected: table.num_groups(),
        });
    }

    let mut entries = Vec::new();
    while let Ok(action) = next() {
        let action = action.parse::<usize>()?;
        let group = next()?.parse::<usize>()?;
        let weight = next()?.parse::<f32>()?;
        if action >= num_actions || group >= num_groups {
            return Err(WeightsError::OutOfRange { action, group });
        }
        entries.push((action, GroupId::new(group), weight));
    }

    table.clear_weights();
    for (action, group, weight) in entries {
        table.set_weight(action, group, weight);
    }
    Ok(true)
}
