use arrayvec::ArrayVec;
use pixelsarsa_learner::{Environment, Step};
use pixelsarsa_vision::PixelGrid;
use rand::{Rng as _, SeedableRng as _};
use rand_pcg::Pcg32;

use crate::GameStats;

pub const SCREEN_HEIGHT: usize = 48;
pub const SCREEN_WIDTH: usize = 32;

const PADDLE_WIDTH: usize = 6;
const PADDLE_HEIGHT: usize = 2;
const PADDLE_ROW: usize = SCREEN_HEIGHT - PADDLE_HEIGHT - 1;
const PADDLE_SPEED: usize = 2;
const BALL_SIZE: usize = 2;
const MAX_BALLS: usize = 3;
const SPAWN_INTERVAL: u64 = 20;
const INITIAL_LIVES: u32 = 3;
const RAM_SIZE: usize = 3 + 2 * MAX_BALLS;

/// Raw pixel values; each lands in a different color under 8-color quantization.
pub mod palette {
    pub const BACKGROUND: u8 = 0x00;
    pub const WALL: u8 = 0x40;
    pub const PADDLE: u8 = 0xa0;
    pub const BALL: u8 = 0xe0;
}

/// Leftmost and rightmost paddle columns, inside the walls.
const PADDLE_MIN: usize = 1;
const PADDLE_MAX: usize = SCREEN_WIDTH - 1 - PADDLE_WIDTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum CatchAction {
    Stay,
    Left,
    Right,
}

impl CatchAction {
    /// All actions, `Stay` first so it serves as the no-op.
    pub const ALL: [Self; 3] = [Self::Stay, Self::Left, Self::Right];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum SessionState {
    Playing,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ball {
    row: usize,
    column: usize,
}

/// Catch falling balls with a paddle.
///
/// Balls appear at the top of a walled playfield and fall one pixel per frame.
/// Catching one with the paddle pays `+1`; letting one reach the floor costs `-1`
/// and a life. The game is over when no lives are left or the frame cap is hit.
#[derive(Debug, Clone)]
pub struct CatchGame {
    rng: Pcg32,
    screen: PixelGrid,
    ram: [u8; RAM_SIZE],
    paddle: usize,
    balls: ArrayVec<Ball, MAX_BALLS>,
    lives: u32,
    frames: u64,
    frame_cap: u64,
    stats: GameStats,
    state: SessionState,
}

impl CatchGame {
    pub const DEFAULT_FRAME_CAP: u64 = 18_000;

    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_frame_cap(seed, Self::DEFAULT_FRAME_CAP)
    }

    #[must_use]
    pub fn with_frame_cap(seed: u64, frame_cap: u64) -> Self {
        let mut this = Self {
            rng: Pcg32::seed_from_u64(seed),
            screen: PixelGrid::filled(SCREEN_HEIGHT, SCREEN_WIDTH, palette::BACKGROUND),
            ram: [0; RAM_SIZE],
            paddle: 0,
            balls: ArrayVec::new(),
            lives: 0,
            frames: 0,
            frame_cap,
            stats: GameStats::new(),
            state: SessionState::Playing,
        };
        this.reset();
        this
    }

    #[must_use]
    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.state
    }

    /// Left edge of the paddle.
    #[must_use]
    pub fn paddle_column(&self) -> usize {
        self.paddle
    }

    #[must_use]
    pub fn num_balls(&self) -> usize {
        self.balls.len()
    }

    fn move_paddle(&mut self, action: CatchAction) {
        self.paddle = match action {
            CatchAction::Stay => self.paddle,
            CatchAction::Left => usize::max(self.paddle.saturating_sub(PADDLE_SPEED), PADDLE_MIN),
            CatchAction::Right => usize::min(self.paddle + PADDLE_SPEED, PADDLE_MAX),
        };
    }

    fn spawn_ball(&mut self) {
        if self.balls.is_full() {
            return;
        }
        let column = self.rng.random_range(1..=SCREEN_WIDTH - 1 - BALL_SIZE);
        self.balls.push(Ball { row: 0, column });
    }

    /// Moves every ball down and settles those reaching the paddle row.
    fn drop_balls(&mut self) -> f64 {
        let mut reward = 0.0;
        let paddle = self.paddle..self.paddle + PADDLE_WIDTH;
        let mut index = 0;
        while index < self.balls.len() {
            let ball = &mut self.balls[index];
            ball.row += 1;
            if ball.row + BALL_SIZE <= PADDLE_ROW {
                index += 1;
                continue;
            }
            let caught = ball.column < paddle.end && paddle.start < ball.column + BALL_SIZE;
            self.balls.swap_remove(index);
            if caught {
                self.stats.record_catch();
                reward += 1.0;
            } else {
                self.stats.record_miss();
                self.lives = self.lives.saturating_sub(1);
                reward -= 1.0;
            }
        }
        reward
    }

    fn draw(&mut self) {
        let screen = &mut self.screen;
        screen.fill(palette::BACKGROUND);
        screen.fill_rect(0, 0, SCREEN_HEIGHT, 1, palette::WALL);
        screen.fill_rect(0, SCREEN_WIDTH - 1, SCREEN_HEIGHT, 1, palette::WALL);
        screen.fill_rect(PADDLE_ROW, self.paddle, PADDLE_HEIGHT, PADDLE_WIDTH, palette::PADDLE);
        for ball in &self.balls {
            screen.fill_rect(ball.row, ball.column, BALL_SIZE, BALL_SIZE, palette::BALL);
        }
    }

    #[expect(clippy::cast_possible_truncation)]
    fn update_ram(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.ram[0] = self.paddle as u8;
        self.ram[1] = self.lives as u8;
        self.ram[2] = self.balls.len() as u8;
        for (slot, ball) in self.ram[3..].chunks_exact_mut(2).zip(&self.balls) {
            slot[0] = ball.row as u8;
            slot[1] = ball.column as u8;
        }
    }

    #[cfg(test)]
    fn place_ball(&mut self, row: usize, column: usize) {
        self.balls.clear();
        self.balls.push(Ball { row, column });
    }
}

impl Environment for CatchGame {
    type Action = CatchAction;

    fn reset(&mut self) {
        self.paddle = (PADDLE_MIN + PADDLE_MAX) / 2;
        self.balls.clear();
        self.lives = INITIAL_LIVES;
        self.frames = 0;
        self.stats = GameStats::new();
        self.state = SessionState::Playing;
        self.spawn_ball();
        self.draw();
        self.update_ram();
    }

    fn step(&mut self, action: CatchAction) -> Step {
        if self.state.is_game_over() {
            return Step {
                reward: 0.0,
                terminal: true,
            };
        }
        self.frames += 1;
        self.move_paddle(action);
        let reward = self.drop_balls();
        if self.frames % SPAWN_INTERVAL == 0 {
            self.spawn_ball();
        }
        if self.lives == 0 || self.frames >= self.frame_cap {
            self.state = SessionState::GameOver;
        }
        self.draw();
        self.update_ram();
        Step {
            reward,
            terminal: self.state.is_game_over(),
        }
    }

    fn screen(&self) -> &PixelGrid {
        &self.screen
    }

    fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn legal_actions(&self) -> &[CatchAction] {
        &CatchAction::ALL
    }

    fn is_terminal(&self) -> bool {
        self.state.is_game_over()
    }

    fn episode_frames(&self) -> u64 {
        self.frames
    }

    fn lives(&self) -> u32 {
        self.lives
    }
}
