use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A piece of per-identity state that a store can persist.
///
/// `Default` is the "no prior activity" value returned for unknown keys.
pub trait Record: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// The instant after which this record carries no information, if the
    /// record itself knows it.
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Fixed window counter for one identity.
///
/// `end_time == None` means no window has been opened yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Window {
    pub count: u64,
    pub end_time: Option<DateTime<Utc>>,
}

impl Window {
    /// A fresh window holding one request, or `None` if its end would not be
    /// a representable timestamp.
    pub(crate) fn open(now: DateTime<Utc>, length: chrono::TimeDelta) -> Option<Self> {
        Some(Self {
            count: 1,
            end_time: Some(now.checked_add_signed(length)?),
        })
    }
}

impl Record for Window {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }
}

/// Token balance for one identity.
///
/// `last_refill == None` marks a bucket that was never initialised, which is
/// not the same thing as an empty one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bucket {
    pub tokens: f64,
    pub last_refill: Option<DateTime<Utc>>,
}

impl Record for Bucket {}
