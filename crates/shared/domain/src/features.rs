use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Maximum length of a feature id.
pub const MAX_FEATURE_ID_LEN: usize = 64;

/// Unique, validated identifier of a feature.
///
/// Ids are lowercase ASCII alphanumerics plus `-` and `_`, start with an alphanumeric
/// character and are at most [`MAX_FEATURE_ID_LEN`] bytes long. They end up inside
/// storage keys, so anything else is rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureId(Arc<str>);

impl FeatureId {
    /// Returns `None` when `raw` is not a well-formed id.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::is_valid(raw).then(|| Self(Arc::from(raw)))
    }

    pub fn is_valid(raw: &str) -> bool {
        let mut bytes = raw.bytes();
        let Some(first) = bytes.next() else {
            return false;
        };
        raw.len() <= MAX_FEATURE_ID_LEN
            && (first.is_ascii_lowercase() || first.is_ascii_digit())
            && bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FeatureId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FeatureId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FeatureId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("malformed feature id '{value}'"))
    }
}

impl From<FeatureId> for String {
    fn from(value: FeatureId) -> Self {
        value.0.as_ref().to_owned()
    }
}

bitflags! {
    /// Capabilities a feature declares at registration.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FeatureTraits: u8 {
        /// The feature processes individual detected elements.
        const ELEMENT_EVENTS = 1 << 0;
        /// Remote toggles cannot be applied incrementally; they force a full reload.
        const RELOAD_ON_TOGGLE = 1 << 1;
    }
}

impl FeatureTraits {
    pub const fn wants_element_events(self) -> bool {
        self.contains(Self::ELEMENT_EVENTS)
    }

    pub const fn reloads_on_toggle(self) -> bool {
        self.contains(Self::RELOAD_ON_TOGGLE)
    }
}

impl Serialize for FeatureTraits {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for FeatureTraits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u8::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}
