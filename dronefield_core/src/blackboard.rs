//! The state arbiter ("blackboard")
//!
//! Owns the grid and the drone's kinematic state and drives the frame loop:
//!
//! ```text
//! Menu --'s'--> Initializing --field ready--> Running --win/lose/quit--> Terminal
//!   \---'q'----------------------------------------------------------->/
//! ```
//!
//! The arbiter talks to the rest of the fleet only through the link traits
//! below, so the same state machine runs over real pipes in production and
//! over in-memory fakes in tests. Any transfer failure ends the episode
//! with `Outcome::Fault`.

use crate::config::{frame_period, MAX_SCORE};
use crate::error::FleetError;
use crate::grid::{Grid, Position};
use crate::keys::{Key, Thrust};
use crate::protocol::{KinematicMessage, PositionReply, StatusRecord};
use crate::score::ScoreKeeper;
use async_trait::async_trait;
use dronefield_env::FleetContext;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Supplies the episode's field.
#[async_trait]
pub trait MapSource: Send {
    /// Reads the obstacle field from the obstacles worker.
    async fn obstacles(&mut self) -> Result<Grid, FleetError>;

    /// Hands `field` to the targets worker and reads back the combined field.
    async fn targets(&mut self, field: &Grid) -> Result<Grid, FleetError>;
}

/// Supplies operator keys.
#[async_trait]
pub trait KeySource: Send {
    /// Waits at most `wait` for one key.
    async fn poll_key(&mut self, wait: Duration) -> Result<Option<Key>, FleetError>;
}

/// The arbiter's side of the per-frame exchange with the navigation engine.
#[async_trait]
pub trait NavigationLink: Send {
    /// Sends the grid then the kinematic message, and waits for the reply.
    async fn exchange(&mut self, grid: &Grid, msg: &KinematicMessage) -> Result<PositionReply, FleetError>;
}

/// Best-effort telemetry consumer. Never fails the frame.
pub trait StatusSink: Send {
    fn publish(&mut self, record: &StatusRecord);
}

/// What the operator sees.
#[derive(Debug)]
pub enum ViewState<'a> {
    Menu,
    Running {
        grid: &'a Grid,
        drone: Position,
        score: u64,
        paused: bool,
    },
    Finished {
        outcome: &'a Outcome,
        score: u64,
    },
}

/// Renders the arbiter's state.
pub trait FrameView: Send {
    fn render(&mut self, view: &ViewState<'_>) -> std::io::Result<()>;
}

/// Everything the arbiter is wired to.
pub struct ArbiterLinks {
    pub maps: Box<dyn MapSource>,
    pub keys: Box<dyn KeySource>,
    pub navigation: Box<dyn NavigationLink>,
    pub status: Box<dyn StatusSink>,
    pub view: Box<dyn FrameView>,
}

/// How an episode ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Every target consumed
    Win,
    /// Score reached zero
    Lose,
    /// Operator pressed 'q'
    Quit,
    /// Shutdown signal received
    Shutdown,
    /// A transfer failed
    Fault(String),
}

impl Outcome {
    /// True unless the episode ended on a fault.
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Fault(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "win"),
            Outcome::Lose => write!(f, "lose"),
            Outcome::Quit => write!(f, "quit"),
            Outcome::Shutdown => write!(f, "shutdown"),
            Outcome::Fault(reason) => write!(f, "fault: {}", reason),
        }
    }
}

/// Arbiter lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterState {
    Menu,
    Initializing,
    Running,
    Terminal(Outcome),
}

/// Final report of an episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub outcome: String,
    pub score: u64,
    pub frames: u64,
    pub distance: u64,
    pub obstacles: usize,
    pub targets_remaining: usize,
}

/// The blackboard state machine.
///
/// Generic over the context so the score clock follows virtual time in
/// simulation.
pub struct Arbiter<Ctx: FleetContext> {
    ctx: Arc<Ctx>,
    links: ArbiterLinks,
    state: ArbiterState,

    grid: Grid,
    previous: Position,
    current: Position,
    thrust: Thrust,
    paused: bool,

    score: ScoreKeeper,
    initial_score: u64,
    started: Duration,
    frames: u64,
    obstacles: usize,

    /// Upper bound on every key poll
    poll: Duration,
}

impl<Ctx: FleetContext> Arbiter<Ctx> {
    pub fn new(ctx: Arc<Ctx>, links: ArbiterLinks) -> Self {
        Self {
            ctx,
            links,
            state: ArbiterState::Menu,
            grid: Grid::empty(),
            previous: Position::centre(),
            current: Position::centre(),
            thrust: Thrust::default(),
            paused: false,
            score: ScoreKeeper::new(0, 0),
            initial_score: MAX_SCORE,
            started: Duration::ZERO,
            frames: 0,
            obstacles: 0,
            poll: frame_period(),
        }
    }

    /// Overrides the starting score.
    pub fn with_initial_score(mut self, score: u64) -> Self {
        self.initial_score = score;
        self
    }

    pub fn state(&self) -> &ArbiterState {
        &self.state
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn position(&self) -> Position {
        self.current
    }

    pub fn thrust(&self) -> Thrust {
        self.thrust
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns the outcome once the episode is over.
    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.state {
            ArbiterState::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Ends the episode on an external shutdown request.
    pub fn shutdown(&mut self) {
        if self.outcome().is_none() {
            self.finish(Outcome::Shutdown);
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        match &outcome {
            Outcome::Fault(reason) => error!("Episode aborted: {}", reason),
            other => info!(
                "Episode over: {} (score={}, frames={})",
                other,
                self.score.score(),
                self.frames
            ),
        }
        let score = self.score.score();
        if let Err(e) = self.links.view.render(&ViewState::Finished {
            outcome: &outcome,
            score,
        }) {
            debug!("Render failed: {}", e);
        }
        self.state = ArbiterState::Terminal(outcome);
    }

    fn render(&mut self) {
        let view = match self.state {
            ArbiterState::Menu => ViewState::Menu,
            _ => ViewState::Running {
                grid: &self.grid,
                drone: self.current,
                score: self.score.score(),
                paused: self.paused,
            },
        };
        if let Err(e) = self.links.view.render(&view) {
            debug!("Render failed: {}", e);
        }
    }

    /// Advances the state machine by one step (one frame while running).
    pub async fn step(&mut self) -> &ArbiterState {
        let result = match self.state {
            ArbiterState::Menu => self.menu().await,
            ArbiterState::Initializing => self.initialize().await,
            ArbiterState::Running => self.frame().await,
            ArbiterState::Terminal(_) => Ok(()),
        };
        if let Err(e) = result {
            self.finish(Outcome::Fault(e.to_string()));
        }
        &self.state
    }

    /// Steps until the episode is over.
    pub async fn run(&mut self) -> Outcome {
        loop {
            if let ArbiterState::Terminal(outcome) = self.step().await {
                return outcome.clone();
            }
        }
    }

    async fn menu(&mut self) -> Result<(), FleetError> {
        self.render();
        match self.links.keys.poll_key(self.poll).await? {
            Some(Key::Quit) => self.finish(Outcome::Quit),
            Some(key) if key.is_start() => {
                info!("Starting episode");
                self.state = ArbiterState::Initializing;
            }
            _ => {}
        }
        Ok(())
    }

    async fn initialize(&mut self) -> Result<(), FleetError> {
        let obstacles = self.links.maps.obstacles().await?;
        let mut field = self.links.maps.targets(&obstacles).await?;
        field.clear_drone();

        self.obstacles = field.count_obstacles();
        let targets = field.count_targets();
        info!("Field ready: {} obstacles, {} targets", self.obstacles, targets);

        self.grid = field;
        self.previous = Position::centre();
        self.current = Position::centre();
        self.thrust = Thrust::default();
        self.paused = false;
        self.frames = 0;
        self.score = ScoreKeeper::with_initial_score(self.initial_score, self.obstacles, targets);
        self.started = self.ctx.now();
        self.state = ArbiterState::Running;
        Ok(())
    }

    async fn frame(&mut self) -> Result<(), FleetError> {
        let key = self.links.keys.poll_key(self.poll).await?;
        match key {
            Some(Key::Quit) => {
                self.finish(Outcome::Quit);
                return Ok(());
            }
            Some(Key::Pause) => {
                self.paused = !self.paused;
                info!("{}", if self.paused { "Paused" } else { "Resumed" });
            }
            Some(k) => self.thrust.apply(k),
            None => {}
        }

        if self.paused {
            self.render();
            return Ok(());
        }

        let msg = KinematicMessage::new(self.previous, self.current, self.thrust);
        let reply = self.links.navigation.exchange(&self.grid, &msg).await?;
        if !reply.position.in_bounds() {
            return Err(FleetError::protocol(format!(
                "navigation replied with off-grid position {}",
                reply.position
            )));
        }

        let from = self.current;
        self.previous = from;
        self.current = reply.position;
        let consumed = self.grid.erase_targets_on_line(from, self.current);
        if consumed > 0 {
            debug!("Consumed {} target(s) moving {} -> {}", consumed, from, self.current);
        }

        self.links.status.publish(&StatusRecord {
            force: self.thrust,
            position: self.current,
            velocity: Position::new(self.current.x - from.x, self.current.y - from.y),
            key,
        });

        let remaining = self.grid.count_targets();
        let elapsed = self.ctx.now().saturating_sub(self.started);
        let score = self.score.frame(from, self.current, remaining, elapsed);
        self.frames += 1;
        self.render();

        if remaining == 0 {
            self.finish(Outcome::Win);
        } else if score == 0 {
            self.finish(Outcome::Lose);
        }
        Ok(())
    }

    /// Consumes the arbiter, releasing every link, and reports the episode.
    pub fn into_summary(self) -> EpisodeSummary {
        EpisodeSummary {
            outcome: self
                .outcome()
                .map(|o| o.to_string())
                .unwrap_or_else(|| "unfinished".to_string()),
            score: self.score.score(),
            frames: self.frames,
            distance: self.score.distance(),
            obstacles: self.obstacles,
            targets_remaining: self.grid.count_targets(),
        }
    }
}
