//! Pipe-backed implementations of the arbiter's links, plus the
//! navigation engine's side of the per-frame exchange.
//!
//! Every record has a fixed size, so transfers are plain `read_exact` /
//! `write_all` calls on `tokio::net::unix::pipe` ends.

use async_trait::async_trait;
use dronefield_core::blackboard::{KeySource, MapSource, NavigationLink};
use dronefield_core::grid::GRID_BYTES;
use dronefield_core::protocol::{KINEMATIC_MESSAGE_LEN, POSITION_REPLY_LEN};
use dronefield_core::{FleetError, Grid, Key, KinematicMessage, PositionReply};
use std::io::ErrorKind;
use std::os::fd::OwnedFd;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tracing::{debug, warn};

/// Wraps an inherited read end.
pub fn receiver(fd: OwnedFd) -> Result<pipe::Receiver, FleetError> {
    Ok(pipe::Receiver::from_owned_fd(fd)?)
}

/// Wraps an inherited write end.
pub fn sender(fd: OwnedFd) -> Result<pipe::Sender, FleetError> {
    Ok(pipe::Sender::from_owned_fd(fd)?)
}

/// Reads one grid record. `None` on a clean end of stream.
pub async fn read_grid(rx: &mut pipe::Receiver) -> Result<Option<Grid>, FleetError> {
    let mut buf = vec![0u8; GRID_BYTES];
    if !read_record(rx, &mut buf).await? {
        return Ok(None);
    }
    Grid::from_bytes(&buf).map(Some)
}

/// Writes one grid record.
pub async fn write_grid(tx: &mut pipe::Sender, grid: &Grid) -> Result<(), FleetError> {
    tx.write_all(&grid.to_bytes()).await?;
    Ok(())
}

/// Fills `buf` completely.
///
/// Returns false if the stream ended before the first byte; an end of
/// stream inside the record is a short read and fails.
async fn read_record(rx: &mut pipe::Receiver, buf: &mut [u8]) -> Result<bool, FleetError> {
    let first = rx.read(buf).await?;
    if first == 0 {
        return Ok(false);
    }
    match rx.read_exact(&mut buf[first..]).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(FleetError::protocol(format!(
            "short read: stream ended inside a {}-byte record",
            buf.len()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Field source backed by the obstacles and targets channels.
pub struct PipeMapSource {
    obstacles: pipe::Receiver,
    to_targets: pipe::Sender,
    from_targets: pipe::Receiver,
}

impl PipeMapSource {
    pub fn new(obstacles: pipe::Receiver, to_targets: pipe::Sender, from_targets: pipe::Receiver) -> Self {
        Self {
            obstacles,
            to_targets,
            from_targets,
        }
    }
}

#[async_trait]
impl MapSource for PipeMapSource {
    async fn obstacles(&mut self) -> Result<Grid, FleetError> {
        read_grid(&mut self.obstacles)
            .await?
            .ok_or_else(|| FleetError::protocol("obstacles channel closed"))
    }

    async fn targets(&mut self, field: &Grid) -> Result<Grid, FleetError> {
        write_grid(&mut self.to_targets, field).await?;
        read_grid(&mut self.from_targets)
            .await?
            .ok_or_else(|| FleetError::protocol("targets channel closed"))
    }
}

/// Key source backed by the input channel.
///
/// Bytes outside the key map are dropped. Once the input worker has gone
/// the source keeps reporting no key.
pub struct PipeKeySource {
    rx: pipe::Receiver,
    closed: bool,
}

impl PipeKeySource {
    pub fn new(rx: pipe::Receiver) -> Self {
        Self { rx, closed: false }
    }
}

#[async_trait]
impl KeySource for PipeKeySource {
    async fn poll_key(&mut self, wait: Duration) -> Result<Option<Key>, FleetError> {
        if self.closed {
            tokio::time::sleep(wait).await;
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        match tokio::time::timeout(wait, self.rx.read(&mut byte)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => {
                warn!("Input channel closed, no more keys");
                self.closed = true;
                Ok(None)
            }
            Ok(Ok(_)) => {
                let key = Key::from_byte(byte[0]);
                if key.is_none() {
                    debug!("Ignoring input byte {:#04x}", byte[0]);
                }
                Ok(key)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

/// The arbiter's end of the navigation channels.
pub struct PipeNavigationLink {
    tx: pipe::Sender,
    rx: pipe::Receiver,
}

impl PipeNavigationLink {
    pub fn new(tx: pipe::Sender, rx: pipe::Receiver) -> Self {
        Self { tx, rx }
    }
}

#[async_trait]
impl NavigationLink for PipeNavigationLink {
    async fn exchange(&mut self, grid: &Grid, msg: &KinematicMessage) -> Result<PositionReply, FleetError> {
        write_grid(&mut self.tx, grid).await?;
        self.tx.write_all(&msg.encode()?).await?;

        let mut reply = [0u8; POSITION_REPLY_LEN];
        if !read_record(&mut self.rx, &mut reply).await? {
            return Err(FleetError::protocol("navigation channel closed"));
        }
        PositionReply::decode(&reply)
    }
}

/// The navigation engine's end of the per-frame exchange.
pub struct DynamicsLink {
    rx: pipe::Receiver,
    tx: pipe::Sender,
}

impl DynamicsLink {
    pub fn new(rx: pipe::Receiver, tx: pipe::Sender) -> Self {
        Self { rx, tx }
    }

    /// Reads the next grid and kinematic message. `None` once the arbiter
    /// has closed its end between frames.
    pub async fn next_frame(&mut self) -> Result<Option<(Grid, KinematicMessage)>, FleetError> {
        let grid = match read_grid(&mut self.rx).await? {
            Some(grid) => grid,
            None => return Ok(None),
        };
        let mut msg = [0u8; KINEMATIC_MESSAGE_LEN];
        if !read_record(&mut self.rx, &mut msg).await? {
            return Err(FleetError::protocol("arbiter closed the channel inside a frame"));
        }
        Ok(Some((grid, KinematicMessage::decode(&msg)?)))
    }

    pub async fn reply(&mut self, reply: &PositionReply) -> Result<(), FleetError> {
        self.tx.write_all(&reply.encode()?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronefield_core::{Cell, NavigationEngine, Position, Thrust};

    fn channel() -> (pipe::Sender, pipe::Receiver) {
        let (read, write) = nix::unistd::pipe().unwrap();
        (sender(write).unwrap(), receiver(read).unwrap())
    }

    #[tokio::test]
    async fn test_grid_transfer_and_clean_eof() {
        let (mut tx, mut rx) = channel();
        let mut grid = Grid::empty();
        grid.set(Position::new(3, 4), Cell::Obstacle);
        grid.set(Position::new(5, 6), Cell::Target(7));

        write_grid(&mut tx, &grid).await.unwrap();
        drop(tx);
        assert_eq!(read_grid(&mut rx).await.unwrap(), Some(grid));
        assert_eq!(read_grid(&mut rx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_short_grid_is_protocol_error() {
        let (mut tx, mut rx) = channel();
        tx.write_all(&[b' '; 100]).await.unwrap();
        drop(tx);
        assert!(matches!(read_grid(&mut rx).await, Err(FleetError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_key_source_filters_and_times_out() {
        let (mut tx, rx) = channel();
        let mut keys = PipeKeySource::new(rx);
        let wait = Duration::from_millis(20);

        assert_eq!(keys.poll_key(wait).await.unwrap(), None);
        tx.write_all(b"zs").await.unwrap();
        assert_eq!(keys.poll_key(wait).await.unwrap(), None);
        assert_eq!(keys.poll_key(wait).await.unwrap(), Some(Key::Left));

        drop(tx);
        assert_eq!(keys.poll_key(wait).await.unwrap(), None);
        assert!(keys.closed);
        assert_eq!(keys.poll_key(wait).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_navigation_exchange_round_trip() {
        let (to_dynamics, from_arbiter) = channel();
        let (to_arbiter, from_dynamics) = channel();
        let mut arbiter = PipeNavigationLink::new(to_dynamics, from_dynamics);
        let mut dynamics = DynamicsLink::new(from_arbiter, to_arbiter);

        let engine = tokio::spawn(async move {
            let engine = NavigationEngine::default();
            let mut frames = 0;
            while let Some((grid, msg)) = dynamics.next_frame().await.unwrap() {
                let next = engine.step(&grid, &msg);
                dynamics.reply(&PositionReply::new(next)).await.unwrap();
                frames += 1;
            }
            frames
        });

        let centre = Position::centre();
        let msg = KinematicMessage::new(centre, centre, Thrust::new(1, 0));
        let reply = arbiter.exchange(&Grid::empty(), &msg).await.unwrap();
        assert_eq!(reply.position, Position::new(51, 50));

        drop(arbiter);
        assert_eq!(engine.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_engine_faults_exchange() {
        let (to_dynamics, _from_arbiter) = channel();
        let (to_arbiter, from_dynamics) = channel();
        drop(to_arbiter);
        let mut arbiter = PipeNavigationLink::new(to_dynamics, from_dynamics);

        let centre = Position::centre();
        let msg = KinematicMessage::new(centre, centre, Thrust::default());
        assert!(arbiter.exchange(&Grid::empty(), &msg).await.is_err());
    }

    #[tokio::test]
    async fn test_map_source_chain() {
        let (mut obstacles_tx, obstacles_rx) = channel();
        let (to_targets, mut targets_in) = channel();
        let (mut targets_out, from_targets) = channel();
        let mut maps = PipeMapSource::new(obstacles_rx, to_targets, from_targets);

        let mut field = Grid::empty();
        field.set(Position::new(10, 10), Cell::Obstacle);
        write_grid(&mut obstacles_tx, &field).await.unwrap();

        let targets = tokio::spawn(async move {
            let mut grid = read_grid(&mut targets_in).await.unwrap().unwrap();
            grid.set(Position::new(20, 20), Cell::Target(9));
            write_grid(&mut targets_out, &grid).await.unwrap();
        });

        let obstacles = maps.obstacles().await.unwrap();
        let combined = maps.targets(&obstacles).await.unwrap();
        targets.await.unwrap();
        assert_eq!(combined.count_obstacles(), 1);
        assert_eq!(combined.count_targets(), 1);
    }
}
