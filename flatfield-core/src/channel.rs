//! Excitation channels and their dark-field plane assignment.

use crate::error::ConfigurationError;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of planes in a dark-field stack (one per known channel).
pub const DARK_FIELD_PLANES: usize = 4;

/// Laser line of an acquisition channel.
///
/// The set is closed. Each channel owns one plane of the dark-field stack;
/// the mapping is total and injective (647 -> 0, 561 -> 1, 488 -> 2, 405 -> 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channel {
    /// 405 nm.
    Nm405,
    /// 488 nm.
    Nm488,
    /// 561 nm.
    Nm561,
    /// 647 nm.
    Nm647,
}

impl Channel {
    /// All channels, in dark-field plane order.
    pub const ALL: [Channel; DARK_FIELD_PLANES] =
        [Channel::Nm647, Channel::Nm561, Channel::Nm488, Channel::Nm405];

    /// Excitation wavelength in nanometres.
    #[must_use]
    pub const fn wavelength_nm(self) -> u32 {
        match self {
            Channel::Nm405 => 405,
            Channel::Nm488 => 488,
            Channel::Nm561 => 561,
            Channel::Nm647 => 647,
        }
    }

    /// Plane of the dark-field stack measured for this channel.
    #[must_use]
    pub const fn dark_field_index(self) -> usize {
        match self {
            Channel::Nm647 => 0,
            Channel::Nm561 => 1,
            Channel::Nm488 => 2,
            Channel::Nm405 => 3,
        }
    }
}

impl TryFrom<u32> for Channel {
    type Error = ConfigurationError;

    fn try_from(wavelength: u32) -> Result<Self, Self::Error> {
        match wavelength {
            405 => Ok(Channel::Nm405),
            488 => Ok(Channel::Nm488),
            561 => Ok(Channel::Nm561),
            647 => Ok(Channel::Nm647),
            other => Err(ConfigurationError::UnknownChannel(other)),
        }
    }
}

impl FromStr for Channel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let wavelength: u32 = trimmed
            .parse()
            .map_err(|_| ConfigurationError::UnparsableChannel(trimmed.to_string()))?;
        Channel::try_from(wavelength)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wavelength_nm())
    }
}
