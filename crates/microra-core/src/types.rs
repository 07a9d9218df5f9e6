use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// NDP lifetime value meaning "never expires" (all ones on the wire).
pub const INFINITY: Duration = Duration::from_secs(u32::MAX as u64);

/// A lifetime as written in configuration: whole seconds or `"infinite"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime(Duration);

impl Lifetime {
    pub const INFINITE: Lifetime = Lifetime(INFINITY);

    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn is_infinite(&self) -> bool {
        self.0 == INFINITY
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Lifetime> for Duration {
    fn from(l: Lifetime) -> Self {
        l.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LifetimeRepr {
    Secs(u64),
    Keyword(String),
}

impl<'de> Deserialize<'de> for Lifetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match LifetimeRepr::deserialize(deserializer)? {
            LifetimeRepr::Secs(secs) if secs <= u32::MAX as u64 => Ok(Lifetime::from_secs(secs)),
            LifetimeRepr::Secs(secs) => Err(D::Error::custom(format!(
                "lifetime {secs}s does not fit in 32 bits, use \"infinite\""
            ))),
            LifetimeRepr::Keyword(k) if k.eq_ignore_ascii_case("infinite") => Ok(Lifetime::INFINITE),
            LifetimeRepr::Keyword(k) => Err(D::Error::custom(format!(
                "invalid lifetime {k:?}: expected seconds or \"infinite\""
            ))),
        }
    }
}

impl Serialize for Lifetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_infinite() {
            serializer.serialize_str("infinite")
        } else {
            serializer.serialize_u64(self.0.as_secs())
        }
    }
}
