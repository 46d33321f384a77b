use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Derivative order of a controlled quantity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Derivative {
    Position = 0,
    Velocity = 1,
    Acceleration = 2,
    Jerk = 3,
    Snap = 4,
}

impl Derivative {
    /// All orders, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Position,
        Self::Velocity,
        Self::Acceleration,
        Self::Jerk,
        Self::Snap,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Position),
            1 => Some(Self::Velocity),
            2 => Some(Self::Acceleration),
            3 => Some(Self::Jerk),
            4 => Some(Self::Snap),
            _ => None,
        }
    }

    /// The next higher order, if any.
    pub const fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// The next lower order, if any.
    pub const fn prev(self) -> Option<Self> {
        match self {
            Self::Position => None,
            _ => Self::from_index(self.index() - 1),
        }
    }

    /// Orders in `from..=to`, empty if `from > to`.
    pub fn range(from: Self, to: Self) -> impl Iterator<Item = Self> {
        (from.index()..=to.index()).filter_map(Self::from_index)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Velocity => "velocity",
            Self::Acceleration => "acceleration",
            Self::Jerk => "jerk",
            Self::Snap => "snap",
        }
    }
}

impl fmt::Display for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Derivative {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| format!("unknown derivative '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_rank() {
        assert!(Derivative::Position < Derivative::Velocity);
        assert!(Derivative::Jerk < Derivative::Snap);
    }

    #[test]
    fn next_and_prev() {
        assert_eq!(Derivative::Velocity.next(), Some(Derivative::Acceleration));
        assert_eq!(Derivative::Snap.next(), None);
        assert_eq!(Derivative::Position.prev(), None);
        assert_eq!(Derivative::Jerk.prev(), Some(Derivative::Acceleration));
    }

    #[test]
    fn range_is_inclusive() {
        let r: Vec<_> = Derivative::range(Derivative::Velocity, Derivative::Jerk).collect();
        assert_eq!(
            r,
            vec![Derivative::Velocity, Derivative::Acceleration, Derivative::Jerk]
        );
        assert_eq!(
            Derivative::range(Derivative::Jerk, Derivative::Velocity).count(),
            0
        );
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("jerk".parse::<Derivative>(), Ok(Derivative::Jerk));
        assert_eq!(Derivative::Acceleration.to_string(), "acceleration");
        assert!("yank".parse::<Derivative>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            d: Derivative,
        }
        let w: Wrapper = toml::from_str("d = \"velocity\"").unwrap();
        assert_eq!(w.d, Derivative::Velocity);
    }
}
