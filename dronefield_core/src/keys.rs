//! Operator keys and the integer thrust they steer.
//!
//! The nine movement keys form a 3x3 pad (`w e r / s d f / x c v`):
//! the left column pushes towards -x, the right column towards +x, the
//! top row towards -y and the bottom row towards +y. The centre key `d`
//! brakes by zeroing the thrust.

use serde::{Deserialize, Serialize};

/// Keys the input worker forwards to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    UpLeft,
    Up,
    UpRight,
    /// Also starts the episode from the menu
    Left,
    Brake,
    Right,
    DownLeft,
    Down,
    DownRight,
    Pause,
    Quit,
}

impl Key {
    /// Every key, in pad order.
    pub fn all() -> [Key; 11] {
        [
            Key::UpLeft,
            Key::Up,
            Key::UpRight,
            Key::Left,
            Key::Brake,
            Key::Right,
            Key::DownLeft,
            Key::Down,
            Key::DownRight,
            Key::Pause,
            Key::Quit,
        ]
    }

    /// Maps a typed character to a key; anything else is ignored.
    pub fn from_char(c: char) -> Option<Key> {
        match c.to_ascii_lowercase() {
            'w' => Some(Key::UpLeft),
            'e' => Some(Key::Up),
            'r' => Some(Key::UpRight),
            's' => Some(Key::Left),
            'd' => Some(Key::Brake),
            'f' => Some(Key::Right),
            'x' => Some(Key::DownLeft),
            'c' => Some(Key::Down),
            'v' => Some(Key::DownRight),
            'p' => Some(Key::Pause),
            'q' => Some(Key::Quit),
            _ => None,
        }
    }

    /// Decodes the single byte sent on the input channel.
    pub fn from_byte(byte: u8) -> Option<Key> {
        Self::from_char(byte as char)
    }

    pub fn as_char(&self) -> char {
        match self {
            Key::UpLeft => 'w',
            Key::Up => 'e',
            Key::UpRight => 'r',
            Key::Left => 's',
            Key::Brake => 'd',
            Key::Right => 'f',
            Key::DownLeft => 'x',
            Key::Down => 'c',
            Key::DownRight => 'v',
            Key::Pause => 'p',
            Key::Quit => 'q',
        }
    }

    pub fn as_byte(&self) -> u8 {
        self.as_char() as u8
    }

    /// True for the key that leaves the menu.
    pub fn is_start(&self) -> bool {
        *self == Key::Left
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Operator thrust in integer units; scaled by the navigation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Thrust {
    pub x: i32,
    pub y: i32,
}

impl Thrust {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Applies one key press.
    pub fn apply(&mut self, key: Key) {
        match key {
            Key::Brake => *self = Thrust::default(),
            Key::Pause | Key::Quit => {}
            _ => {
                let (dx, dy) = Self::direction(key);
                self.x = self.x.saturating_add(dx);
                self.y = self.y.saturating_add(dy);
            }
        }
    }

    fn direction(key: Key) -> (i32, i32) {
        let dx = match key {
            Key::UpLeft | Key::Left | Key::DownLeft => -1,
            Key::UpRight | Key::Right | Key::DownRight => 1,
            _ => 0,
        };
        let dy = match key {
            Key::UpLeft | Key::Up | Key::UpRight => -1,
            Key::DownLeft | Key::Down | Key::DownRight => 1,
            _ => 0,
        };
        (dx, dy)
    }
}
