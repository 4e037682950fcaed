use std::fmt;

use serde::{Deserialize, Serialize};

/// What happens when a pipeline is submitted under a name that already has
/// an active run.
///
/// # Examples
///
/// ```
/// use taskchain::UniqueWorkPolicy;
///
/// let policy: UniqueWorkPolicy = serde_json::from_str("\"replace\"").unwrap();
/// assert_eq!(policy, UniqueWorkPolicy::Replace);
/// assert_eq!(policy.to_string(), "replace");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueWorkPolicy {
    /// Cancel the active run, then start the new one.
    Replace,
    /// Leave the active run alone and discard the new pipeline.
    Keep,
    /// Start the new run once the active run reaches a terminal state.
    Append,
}

impl fmt::Display for UniqueWorkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Keep => write!(f, "keep"),
            Self::Append => write!(f, "append"),
        }
    }
}
