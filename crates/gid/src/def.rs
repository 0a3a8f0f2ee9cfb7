//! Sequence definitions and the JSON definition loader.
//!
//! A definition document looks like:
//!
//! ```json
//! {
//!   "sequences": [
//!     { "name": "trace",   "kind": "snowflake", "worker_id_bits": 10, "sequence_bits": 12 },
//!     { "name": "order",   "kind": "ticktock" },
//!     { "name": "invoice", "kind": "breadcrumb", "cache": 100, "increment": 1, "start": 1000 }
//!   ]
//! }
//! ```
//!
//! Omitted parameters take the per-kind defaults.

use crate::error::{Error, Result};
use crate::generator::{CounterSettings, Layout, validate_widths};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SNOWFLAKE_WORKER_ID_BITS: u8 = 10;
pub const DEFAULT_SNOWFLAKE_SEQUENCE_BITS: u8 = 12;
pub const DEFAULT_TICKTOCK_WORKER_ID_DIGITS: u8 = 3;
pub const DEFAULT_TICKTOCK_SEQUENCE_DIGITS: u8 = 4;
pub const DEFAULT_BREADCRUMB_CACHE: i32 = 0;
pub const DEFAULT_BREADCRUMB_INCREMENT: i64 = 1;
pub const DEFAULT_BREADCRUMB_START: i64 = 0;

/// One named identifier stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: Kind,
}

/// Engine kind and its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Kind {
    /// Binary clock layout; widths in bits, summing to 22.
    Snowflake {
        #[serde(default = "snowflake_worker_id_bits", alias = "workerIdWidth")]
        worker_id_bits: u8,
        #[serde(default = "snowflake_sequence_bits", alias = "sequenceWidth")]
        sequence_bits: u8,
    },
    /// Decimal clock layout; widths in digits, summing to 7.
    Ticktock {
        #[serde(default = "ticktock_worker_id_digits", alias = "workerIdWidth")]
        worker_id_bits: u8,
        #[serde(default = "ticktock_sequence_digits", alias = "sequenceWidth")]
        sequence_bits: u8,
    },
    /// Coordination-backed counter.
    Breadcrumb {
        #[serde(default = "breadcrumb_cache")]
        cache: i32,
        #[serde(default = "breadcrumb_increment", alias = "incr")]
        increment: i64,
        #[serde(default = "breadcrumb_start")]
        start: i64,
    },
}

const fn snowflake_worker_id_bits() -> u8 {
    DEFAULT_SNOWFLAKE_WORKER_ID_BITS
}
const fn snowflake_sequence_bits() -> u8 {
    DEFAULT_SNOWFLAKE_SEQUENCE_BITS
}
const fn ticktock_worker_id_digits() -> u8 {
    DEFAULT_TICKTOCK_WORKER_ID_DIGITS
}
const fn ticktock_sequence_digits() -> u8 {
    DEFAULT_TICKTOCK_SEQUENCE_DIGITS
}
const fn breadcrumb_cache() -> i32 {
    DEFAULT_BREADCRUMB_CACHE
}
const fn breadcrumb_increment() -> i64 {
    DEFAULT_BREADCRUMB_INCREMENT
}
const fn breadcrumb_start() -> i64 {
    DEFAULT_BREADCRUMB_START
}

impl Kind {
    /// Lowercase kind tag as it appears in definition documents.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Snowflake { .. } => "snowflake",
            Self::Ticktock { .. } => "ticktock",
            Self::Breadcrumb { .. } => "breadcrumb",
        }
    }

    /// Clock layout for the clock kinds.
    pub const fn layout(&self) -> Option<Layout> {
        match self {
            Self::Snowflake { .. } => Some(Layout::Binary),
            Self::Ticktock { .. } => Some(Layout::Decimal),
            Self::Breadcrumb { .. } => None,
        }
    }
}

impl SequenceDefinition {
    /// A snowflake sequence with the default 10/12 split.
    pub fn snowflake(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Kind::Snowflake {
                worker_id_bits: DEFAULT_SNOWFLAKE_WORKER_ID_BITS,
                sequence_bits: DEFAULT_SNOWFLAKE_SEQUENCE_BITS,
            },
        }
    }

    /// A ticktock sequence with the default 3/4 split.
    pub fn ticktock(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Kind::Ticktock {
                worker_id_bits: DEFAULT_TICKTOCK_WORKER_ID_DIGITS,
                sequence_bits: DEFAULT_TICKTOCK_SEQUENCE_DIGITS,
            },
        }
    }

    /// An uncached breadcrumb sequence counting up by one from zero.
    pub fn breadcrumb(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Kind::Breadcrumb {
                cache: DEFAULT_BREADCRUMB_CACHE,
                increment: DEFAULT_BREADCRUMB_INCREMENT,
                start: DEFAULT_BREADCRUMB_START,
            },
        }
    }

    /// Overrides the worker/sequence split of a clock kind. No effect on a
    /// breadcrumb.
    #[must_use]
    pub fn with_widths(mut self, worker: u8, sequence: u8) -> Self {
        match &mut self.kind {
            Kind::Snowflake {
                worker_id_bits,
                sequence_bits,
            }
            | Kind::Ticktock {
                worker_id_bits,
                sequence_bits,
            } => {
                *worker_id_bits = worker;
                *sequence_bits = sequence;
            }
            Kind::Breadcrumb { .. } => {}
        }
        self
    }

    /// Overrides the counter parameters of a breadcrumb. No effect on a clock
    /// kind.
    #[must_use]
    pub fn with_counter(mut self, new_cache: i32, new_increment: i64, new_start: i64) -> Self {
        if let Kind::Breadcrumb {
            cache,
            increment,
            start,
        } = &mut self.kind
        {
            *cache = new_cache;
            *increment = new_increment;
            *start = new_start;
        }
        self
    }

    /// Checks the per-kind invariants.
    ///
    /// # Errors
    /// [`Error::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::config(&self.name, "sequence name must not be empty"));
        }
        match self.kind {
            Kind::Snowflake {
                worker_id_bits,
                sequence_bits,
            } => validate_widths(name, Layout::Binary, worker_id_bits, sequence_bits),
            Kind::Ticktock {
                worker_id_bits,
                sequence_bits,
            } => validate_widths(name, Layout::Decimal, worker_id_bits, sequence_bits),
            Kind::Breadcrumb {
                cache, increment, ..
            } => {
                if increment == 0 {
                    return Err(Error::config(name, "increment must not be 0"));
                }
                if cache < 0 {
                    return Err(Error::config(name, format!("cache ({cache}) must not be negative")));
                }
                Ok(())
            }
        }
    }

    /// Trims the name and validates.
    pub fn validated(mut self) -> Result<Self> {
        self.name = self.name.trim().to_owned();
        self.validate()?;
        Ok(self)
    }

    /// Counter parameters of a breadcrumb.
    pub fn counter_settings(&self) -> Option<CounterSettings> {
        match self.kind {
            Kind::Breadcrumb {
                cache,
                increment,
                start,
            } => Some(CounterSettings {
                cache: usize::try_from(cache).unwrap_or(0),
                increment,
                start,
            }),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    sequences: Vec<SequenceDefinition>,
}

/// Parses and validates a definition document.
///
/// # Errors
/// - [`Error::Parse`] for malformed JSON or an unknown kind.
/// - [`Error::Configuration`] for the first definition that fails validation.
pub fn parse_definitions(text: &str) -> Result<Vec<SequenceDefinition>> {
    let document: Document = serde_json::from_str(text)?;
    document
        .sequences
        .into_iter()
        .map(SequenceDefinition::validated)
        .collect()
}

/// Reads, parses and validates the definition document at `path`.
pub fn load_definitions(path: impl AsRef<Path>) -> Result<Vec<SequenceDefinition>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|err| Error::Io(format!("{}: {err}", path.display())))?;
    let definitions = parse_definitions(&text)?;
    #[cfg(feature = "tracing")]
    tracing::info!(path = %path.display(), count = definitions.len(), "loaded sequence definitions");
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_per_kind() {
        let defs = parse_definitions(
            r#"{"sequences": [
                {"name": "a", "kind": "snowflake"},
                {"name": "b", "kind": "ticktock"},
                {"name": "c", "kind": "breadcrumb"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            defs,
            vec![
                SequenceDefinition::snowflake("a"),
                SequenceDefinition::ticktock("b"),
                SequenceDefinition::breadcrumb("c"),
            ]
        );
        assert_eq!(
            defs[2].counter_settings(),
            Some(CounterSettings::default())
        );
    }

    #[test]
    fn explicit_parameters_and_aliases() {
        let defs = parse_definitions(
            r#"{"sequences": [
                {"name": " order ", "kind": "breadcrumb", "cache": 100, "incr": 10, "start": 5},
                {"name": "trace", "kind": "snowflake", "workerIdWidth": 5, "sequenceWidth": 17}
            ]}"#,
        )
        .unwrap();
        assert_eq!(defs[0], SequenceDefinition::breadcrumb("order").with_counter(100, 10, 5));
        assert_eq!(defs[1], SequenceDefinition::snowflake("trace").with_widths(5, 17));
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        for text in [
            r#"{"sequences": [{"name": "x", "kind": "snowflake", "worker_id_bits": 10, "sequence_bits": 11}]}"#,
            r#"{"sequences": [{"name": "x", "kind": "ticktock", "worker_id_bits": 4, "sequence_bits": 4}]}"#,
            r#"{"sequences": [{"name": "x", "kind": "breadcrumb", "increment": 0}]}"#,
            r#"{"sequences": [{"name": "x", "kind": "breadcrumb", "cache": -1}]}"#,
            r#"{"sequences": [{"name": "  ", "kind": "breadcrumb"}]}"#,
        ] {
            let err = parse_definitions(text).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{text}: {err}");
        }
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        assert!(matches!(parse_definitions("{"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_definitions(r#"{"sequences": [{"name": "x", "kind": "uuid"}]}"#),
            Err(Error::Parse(_))
        ));
        assert_eq!(parse_definitions("{}").unwrap(), Vec::new());
    }

    #[test]
    fn load_from_file() {
        use std::io::Write;

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"sequences": [{{"name": "a", "kind": "ticktock"}}]}}"#).unwrap();
        let defs = load_definitions(file.path()).unwrap();
        assert_eq!(defs, vec![SequenceDefinition::ticktock("a")]);

        let err = load_definitions(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
