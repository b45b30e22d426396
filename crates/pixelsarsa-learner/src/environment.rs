use pixelsarsa_vision::PixelGrid;

/// Outcome of applying one action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub reward: f64,
    pub terminal: bool,
}

/// A game the agent can play.
///
/// Calls are synchronous. The screen size must stay fixed for the lifetime of the
/// environment.
pub trait Environment {
    type Action: Copy;

    /// Starts a new episode.
    fn reset(&mut self);

    /// Applies `action` and advances the game.
    fn step(&mut self, action: Self::Action) -> Step;

    fn screen(&self) -> &PixelGrid;

    fn ram(&self) -> &[u8];

    /// Actions the agent chooses from; the first one is the no-op.
    fn legal_actions(&self) -> &[Self::Action];

    fn is_terminal(&self) -> bool;

    /// Frames elapsed since the last reset.
    fn episode_frames(&self) -> u64;

    fn lives(&self) -> u32;
}
