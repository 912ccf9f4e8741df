//! Per-frame wire records.
//!
//! Each frame the arbiter sends two messages on its private channel to
//! the navigation engine and blocks on one reply:
//!
//! ```text
//! Arbiter                                   Navigation engine
//!   |-- grid: W*H bytes, one per cell ------------>|
//!   |-- kinematic: 100 bytes, NUL padded --------->|
//!   |      "prev_x,prev_y,cur_x,cur_y,fx,fy"       |
//!   |<-------------- reply: 32 bytes, NUL padded --|
//!   |                "new_x,new_y"                 |
//! ```
//!
//! Status records go to the inspector as newline-terminated text.

use crate::error::FleetError;
use crate::grid::Position;
use crate::keys::{Key, Thrust};
use serde::{Deserialize, Serialize};

/// Fixed size of the kinematic message.
pub const KINEMATIC_MESSAGE_LEN: usize = 100;

/// Fixed size of the position reply.
pub const POSITION_REPLY_LEN: usize = 32;

/// Writes `text` at the start of a zeroed fixed-size buffer.
fn pad<const N: usize>(text: &str) -> Result<[u8; N], FleetError> {
    let bytes = text.as_bytes();
    if bytes.len() >= N {
        return Err(FleetError::protocol(format!(
            "record '{}' does not fit in {} bytes",
            text, N
        )));
    }
    let mut buf = [0u8; N];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// Parses exactly `N` comma-separated integers, stopping at the first NUL.
fn parse_fields<const N: usize>(bytes: &[u8], what: &str) -> Result<[i32; N], FleetError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|_| FleetError::protocol(format!("{} is not ASCII", what)))?;

    let mut fields = [0i32; N];
    let mut parts = text.trim().split(',');
    for slot in fields.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| FleetError::protocol(format!("{} '{}' has too few fields", what, text)))?;
        *slot = part
            .trim()
            .parse()
            .map_err(|_| FleetError::protocol(format!("{} field '{}' is not an integer", what, part)))?;
    }
    if parts.next().is_some() {
        return Err(FleetError::protocol(format!("{} '{}' has too many fields", what, text)));
    }
    Ok(fields)
}

/// Kinematic state sent to the navigation engine every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KinematicMessage {
    pub previous: Position,
    pub current: Position,
    pub thrust: Thrust,
}

impl KinematicMessage {
    pub fn new(previous: Position, current: Position, thrust: Thrust) -> Self {
        Self {
            previous,
            current,
            thrust,
        }
    }

    /// Encodes as the fixed 100-byte NUL-padded record.
    pub fn encode(&self) -> Result<[u8; KINEMATIC_MESSAGE_LEN], FleetError> {
        pad(&format!(
            "{},{},{},{},{},{}",
            self.previous.x,
            self.previous.y,
            self.current.x,
            self.current.y,
            self.thrust.x,
            self.thrust.y
        ))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FleetError> {
        let [px, py, cx, cy, fx, fy] = parse_fields::<6>(bytes, "kinematic message")?;
        Ok(Self::new(
            Position::new(px, py),
            Position::new(cx, cy),
            Thrust::new(fx, fy),
        ))
    }
}

/// New drone position returned by the navigation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionReply {
    pub position: Position,
}

impl PositionReply {
    pub fn new(position: Position) -> Self {
        Self { position }
    }

    /// Encodes as the fixed 32-byte NUL-padded record.
    pub fn encode(&self) -> Result<[u8; POSITION_REPLY_LEN], FleetError> {
        pad(&format!("{},{}", self.position.x, self.position.y))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FleetError> {
        let [x, y] = parse_fields::<2>(bytes, "position reply")?;
        Ok(Self::new(Position::new(x, y)))
    }
}

/// One frame of telemetry for the inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub force: Thrust,
    pub position: Position,
    pub velocity: Position,
    /// Key handled this frame, if any
    pub key: Option<Key>,
}

impl StatusRecord {
    /// Formats as `fx,fy,px,py,vx,vy,key\n`, with `-` when no key was pressed.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}\n",
            self.force.x,
            self.force.y,
            self.position.x,
            self.position.y,
            self.velocity.x,
            self.velocity.y,
            self.key.map(|k| k.as_char()).unwrap_or('-')
        )
    }

    pub fn parse(line: &str) -> Result<Self, FleetError> {
        let line = line.trim_end();
        let (numbers, key) = line
            .rsplit_once(',')
            .ok_or_else(|| FleetError::protocol(format!("status record '{}' has no key", line)))?;
        let [fx, fy, px, py, vx, vy] = parse_fields::<6>(numbers.as_bytes(), "status record")?;
        let key = match key {
            "-" => None,
            k => Some(
                k.chars()
                    .next()
                    .and_then(Key::from_char)
                    .ok_or_else(|| FleetError::protocol(format!("unknown key '{}'", k)))?,
            ),
        };
        Ok(Self {
            force: Thrust::new(fx, fy),
            position: Position::new(px, py),
            velocity: Position::new(vx, vy),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kinematic_wire_layout() {
        let msg = KinematicMessage::new(Position::new(50, 50), Position::new(51, 49), Thrust::new(-2, 3));
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), KINEMATIC_MESSAGE_LEN);
        assert!(bytes.starts_with(b"50,50,51,49,-2,3\0"));
        assert!(bytes[17..].iter().all(|b| *b == 0));
        assert_eq!(KinematicMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_reply_wire_layout() {
        let reply = PositionReply::new(Position::new(2, 97));
        let bytes = reply.encode().unwrap();
        assert_eq!(bytes.len(), POSITION_REPLY_LEN);
        assert!(bytes.starts_with(b"2,97\0"));
        assert_eq!(PositionReply::decode(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_malformed_records_rejected() {
        assert!(PositionReply::decode(b"12\0").is_err());
        assert!(PositionReply::decode(b"1,2,3\0").is_err());
        assert!(PositionReply::decode(b"a,b\0").is_err());
        assert!(PositionReply::decode(&[0u8; 32]).is_err());
        assert!(KinematicMessage::decode(b"1,2,3,4,5\0").is_err());
    }

    #[test]
    fn test_status_record_line() {
        let record = StatusRecord {
            force: Thrust::new(1, -1),
            position: Position::new(40, 41),
            velocity: Position::new(0, 2),
            key: Some(Key::UpRight),
        };
        assert_eq!(record.to_line(), "1,-1,40,41,0,2,r\n");
        assert_eq!(StatusRecord::parse(&record.to_line()).unwrap(), record);

        let idle = StatusRecord { key: None, ..record };
        assert_eq!(idle.to_line(), "1,-1,40,41,0,2,-\n");
        assert_eq!(StatusRecord::parse("1,-1,40,41,0,2,-").unwrap(), idle);
    }

    proptest! {
        #[test]
        fn prop_reply_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = PositionReply::decode(&bytes);
        }
    }
}
