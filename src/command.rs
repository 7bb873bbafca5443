//! Commands sent by the keyboard and the mapping that resolves them.
//!
//! A decoded [`Frame`](crate::frame::Frame) is parsed into a [`Command`] by
//! [`parse`], then turned into a [`ResolvedAction`] by looking its argument
//! up in an [`ActionMapping`].  Both steps fail with a [`ParseFailure`] that
//! only concerns the frame at hand; the channel keeps running.
//!
//! The protocol currently defines a single verb:
//!
//! ```text
//! APP:<identifier>\r\n
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of an application launch frame.
pub const APP_PREFIX: &str = "APP:";

/// Verbs understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// Open the application mapped to the argument.
    App,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::App => write!(f, "APP"),
        }
    }
}

/// A parsed command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub argument: String,
}

/// Why a frame did not lead to an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    /// Unknown prefix or empty argument.
    #[error("unrecognized frame {0:?}")]
    Unrecognized(String),
    /// Well-formed command whose identifier has no mapping.
    #[error("unmapped identifier {0:?}")]
    UnmappedIdentifier(String),
}

/// Parse a frame (terminator already stripped) into a [`Command`].
pub fn parse(frame: &str) -> Result<Command, ParseFailure> {
    match frame.strip_prefix(APP_PREFIX) {
        Some(argument) if !argument.is_empty() => Ok(Command {
            verb: Verb::App,
            argument: argument.to_string(),
        }),
        _ => Err(ParseFailure::Unrecognized(frame.to_string())),
    }
}

/// An application that should be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAction {
    /// The identifier as sent by the device.
    pub identifier: String,
    pub path: PathBuf,
}

/// Lowercase identifier → application path.
///
/// Keys are lowercased on construction so lookups are case-insensitive no
/// matter how the configuration spells them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionMapping(BTreeMap<String, PathBuf>);

impl ActionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a mapping.
    pub fn insert(&mut self, identifier: &str, path: impl Into<PathBuf>) {
        self.0.insert(identifier.to_lowercase(), path.into());
    }

    /// Look up `identifier`, ignoring case.
    pub fn get(&self, identifier: &str) -> Option<&Path> {
        self.0.get(&identifier.to_lowercase()).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Resolve `command` to the application it names.
    pub fn resolve(&self, command: &Command) -> Result<ResolvedAction, ParseFailure> {
        match command.verb {
            Verb::App => self
                .get(&command.argument)
                .map(|path| ResolvedAction {
                    identifier: command.argument.clone(),
                    path: path.to_path_buf(),
                })
                .ok_or_else(|| ParseFailure::UnmappedIdentifier(command.argument.clone())),
        }
    }
}

impl<K: AsRef<str>, V: Into<PathBuf>> FromIterator<(K, V)> for ActionMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (k, v) in iter {
            mapping.insert(k.as_ref(), v);
        }
        mapping
    }
}

impl<'de> Deserialize<'de> for ActionMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, PathBuf>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

/// Parse and resolve `frame` in one step.
pub fn dispatch(frame: &str, mapping: &ActionMapping) -> Result<ResolvedAction, ParseFailure> {
    let command = parse(frame)?;
    mapping.resolve(&command)
}

//  Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> ActionMapping {
        [("browser", "/Applications/Google Chrome.app")]
            .into_iter()
            .collect()
    }

    #[test]
    fn parse_app_frame() {
        let cmd = parse("APP:browser").unwrap();
        assert_eq!(
            cmd,
            Command {
                verb: Verb::App,
                argument: "browser".into()
            }
        );
        assert_eq!(cmd.verb.to_string(), "APP");
    }

    #[test]
    fn parse_empty_argument_is_unrecognized() {
        assert_eq!(
            parse("APP:"),
            Err(ParseFailure::Unrecognized("APP:".into()))
        );
    }

    #[test]
    fn parse_unknown_prefix_is_unrecognized() {
        assert_eq!(
            parse("HELLO"),
            Err(ParseFailure::Unrecognized("HELLO".into()))
        );
        assert_eq!(parse(""), Err(ParseFailure::Unrecognized("".into())));
        // The prefix is case-sensitive.
        assert!(parse("app:browser").is_err());
    }

    #[test]
    fn resolve_known_identifier() {
        let cmd = parse("APP:browser").unwrap();
        let action = mapping().resolve(&cmd).unwrap();
        assert_eq!(
            action,
            ResolvedAction {
                identifier: "browser".into(),
                path: PathBuf::from("/Applications/Google Chrome.app"),
            }
        );
    }

    #[test]
    fn resolve_ignores_case() {
        let action = dispatch("APP:BrOwSeR", &mapping()).unwrap();
        assert_eq!(action.identifier, "BrOwSeR");
        assert_eq!(action.path, PathBuf::from("/Applications/Google Chrome.app"));
    }

    #[test]
    fn resolve_unknown_identifier() {
        assert_eq!(
            dispatch("APP:editor", &mapping()),
            Err(ParseFailure::UnmappedIdentifier("editor".into()))
        );
    }

    #[test]
    fn deserialized_keys_are_lowercased() {
        let m: ActionMapping =
            serde_json::from_str(r#"{ "Music": "/Applications/Music.app" }"#).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.iter().next().unwrap().0, "music");
        assert_eq!(m.get("MUSIC"), Some(Path::new("/Applications/Music.app")));
    }

    #[test]
    fn failure_messages_name_the_reason() {
        assert_eq!(
            ParseFailure::Unrecognized("HELLO".into()).to_string(),
            "unrecognized frame \"HELLO\""
        );
        assert_eq!(
            ParseFailure::UnmappedIdentifier("editor".into()).to_string(),
            "unmapped identifier \"editor\""
        );
    }
}
