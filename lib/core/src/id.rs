//! Strongly-typed identifiers.
//!
//! Identifiers use ULID, so a run identifier sorts by the time it was issued
//! and can be used directly as a directory name under the work directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// A string that is not a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type, e.g. `RunId`.
    pub id_type: &'static str,
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Parses `text` as a ULID, with or without the `<prefix>_` label.
fn parse_labelled(text: &str, prefix: &str, id_type: &'static str) -> Result<Ulid, ParseIdError> {
    let bare = text
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(text);
    bare.parse::<Ulid>().map_err(|e| ParseIdError {
        id_type,
        reason: e.to_string(),
    })
}

/// Declares ULID-backed identifiers displayed as `<label>_<ulid>`.
///
/// Serialized as their display form.
macro_rules! ulid_ids {
    ($($(#[$doc:meta])* $id:ident => $label:literal;)+) => {$(
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $id(Ulid);

        impl $id {
            /// Issues an identifier stamped with the current time.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Label written before the ULID.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $label
            }
        }

        impl Default for $id {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::prefix())?;
                f.write_str("_")?;
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $id {
            type Err = ParseIdError;

            fn from_str(text: &str) -> Result<Self, ParseIdError> {
                parse_labelled(text, Self::prefix(), stringify!($id)).map(Self)
            }
        }

        impl From<$id> for String {
            fn from(id: $id) -> String {
                id.to_string()
            }
        }

        impl TryFrom<String> for $id {
            type Error = ParseIdError;

            fn try_from(text: String) -> Result<Self, ParseIdError> {
                text.parse()
            }
        }
    )+};
}

ulid_ids! {
    /// Identifier of one invocation of the pipeline (`run_uuid`).
    ///
    /// Written into the configuration file, used to name the execution plan
    /// directory, and recorded in crash reports.
    RunId => "run";

    /// Identifier of a crash report emitted when a subject workflow fails.
    CrashId => "crash";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_format() {
        let id = RunId::new();
        assert!(id.to_string().starts_with("run_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: RunId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn crash_ids_reject_the_run_label() {
        let ulid = Ulid::new();
        let err = format!("run_{ulid}").parse::<CrashId>().unwrap_err();
        assert_eq!(err.id_type, "CrashId");
        assert_eq!(CrashId::prefix(), "crash");
    }

    #[test]
    fn parse_invalid_ulid() {
        let result: Result<CrashId, _> = "crash_not-a-ulid".parse();
        let err = result.unwrap_err();
        assert_eq!(err.id_type, "CrashId");
    }

    #[test]
    fn serializes_as_prefixed_string() {
        let id = RunId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
        let parsed: RunId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, id);
    }
}
