pub use self::{
    checkpoint::*, config::*, environment::*, groups::*, params::*, sarsa::*, weights_file::*,
};

mod checkpoint;
mod config;
mod environment;
mod groups;
mod params;
pub mod persist;
mod sarsa;
mod weights_file;
