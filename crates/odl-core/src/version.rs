use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol version of a payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ODataVersion {
    #[default]
    #[serde(rename = "4.0")]
    V4,
    #[serde(rename = "4.01")]
    V401,
}

impl fmt::Display for ODataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "4.0"),
            Self::V401 => write!(f, "4.01"),
        }
    }
}
