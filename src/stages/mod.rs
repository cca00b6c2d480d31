mod chars;
mod confirm;
mod discover;

pub use chars::CharProber;
pub use confirm::Confirmer;
pub use discover::Discoverer;

use std::fmt;

use serde::Serialize;

use crate::probe::ProbeTarget;

pub const DEFAULT_MARKER: &str = "kXssRand0mStr1ng";

pub const DEFAULT_PAYLOAD_PREFIX: &str = "kXssT3st";
pub const DEFAULT_PAYLOAD_SUFFIX: &str = "P4yL0ad";

pub const DEFAULT_PROBE_CHARS: [char; 10] = ['"', '\'', '<', '>', '(', ')', '`', ';', '{', '}'];

/// One query parameter on one URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParamCandidate {
    pub url: ProbeTarget,
    pub param: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Finding {
    pub url: String,
    pub param: String,
    pub character: char,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "param {} is reflected and allows {} on {}",
            self.param, self.character, self.url
        )
    }
}
