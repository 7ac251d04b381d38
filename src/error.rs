//! Diagnostic error types surfaced by the daemon core.
//!
//! `DaemonError::name()` is the stable short form carried on the wire as the
//! payload of status=err responses; everything else is rich miette output
//! for humans.

use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

pub type DaemonResult<T> = std::result::Result<T, DaemonError>;

/// Wire protocol failures. A request that fails to decode terminates the
/// offending client connection; a response that fails to encode is dropped
/// and logged.
#[derive(Debug, Error, Diagnostic)]
pub enum ProtocolError {
    #[error("invalid frame magic")]
    #[diagnostic(code(velos::protocol::bad_magic))]
    BadMagic,

    #[error("unsupported protocol version {0}")]
    #[diagnostic(code(velos::protocol::bad_version))]
    UnsupportedVersion(u8),

    #[error("payload of {0} bytes exceeds the 4 MiB cap")]
    #[diagnostic(code(velos::protocol::payload_too_large))]
    PayloadTooLarge(usize),

    #[error("truncated message: wanted {wanted} bytes, {remaining} remain")]
    #[diagnostic(code(velos::protocol::truncated))]
    Truncated { wanted: usize, remaining: usize },
}

/// Errors surfaced by the supervisor and its collaborators.
#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    #[error("no process with id {0}")]
    #[diagnostic(code(velos::daemon::process_not_found))]
    ProcessNotFound(u32),

    #[error("no processes named '{0}'")]
    #[diagnostic(code(velos::daemon::name_not_found))]
    NameNotFound(String),

    #[error("{op}: {errno}")]
    #[diagnostic(code(velos::daemon::os))]
    Os { op: &'static str, errno: Errno },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid cron expression '{expr}': {reason}")]
    #[diagnostic(
        code(velos::daemon::cron),
        help("expected five fields: minute hour day-of-month month weekday")
    )]
    CronParse { expr: String, reason: String },

    #[error("channel message of {0} bytes exceeds the 64 KiB cap")]
    #[diagnostic(code(velos::daemon::channel_message_too_large))]
    ChannelMessageTooLarge(usize),

    #[error("file watch setup failed: {0}")]
    #[diagnostic(code(velos::daemon::watch))]
    Watch(String),
}

impl DaemonError {
    pub fn os(op: &'static str) -> Self {
        DaemonError::Os {
            op,
            errno: Errno::last(),
        }
    }

    /// Stable error name used as the textual payload of err responses.
    pub fn name(&self) -> String {
        match self {
            DaemonError::ProcessNotFound(_) | DaemonError::NameNotFound(_) => {
                "ProcessNotFound".to_string()
            }
            DaemonError::Os { errno, .. } => format!("{errno:?}"),
            DaemonError::Protocol(_) => "Protocol".to_string(),
            DaemonError::CronParse { .. } => "CronParse".to_string(),
            DaemonError::ChannelMessageTooLarge(_) => "PayloadTooLarge".to_string(),
            DaemonError::Watch(_) => "Watch".to_string(),
        }
    }
}

/// Find the most similar process name for "did you mean" suggestions.
pub fn find_similar_process<'a>(
    name: &str,
    available: impl Iterator<Item = &'a str>,
) -> Option<String> {
    use fuzzy_matcher::skim::SkimMatcherV2;
    use fuzzy_matcher::FuzzyMatcher;

    let matcher = SkimMatcherV2::default();
    available
        .filter_map(|candidate| {
            matcher
                .fuzzy_match(candidate, name)
                .map(|score| (candidate, score))
        })
        .max_by_key(|(_, score)| *score)
        .filter(|(_, score)| *score > 0)
        .map(|(candidate, _)| format!("did you mean '{candidate}'?"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(DaemonError::ProcessNotFound(7).name(), "ProcessNotFound");
        assert_eq!(
            DaemonError::NameNotFound("web".into()).name(),
            "ProcessNotFound"
        );
        assert_eq!(
            DaemonError::Os {
                op: "fork",
                errno: Errno::ENOENT
            }
            .name(),
            "ENOENT"
        );
        assert_eq!(
            DaemonError::Protocol(ProtocolError::BadMagic).name(),
            "Protocol"
        );
    }

    #[test]
    fn test_find_similar_process() {
        let names = ["postgres", "redis", "web:0", "worker"];
        assert_eq!(
            find_similar_process("postgre", names.iter().copied()),
            Some("did you mean 'postgres'?".to_string())
        );
        assert!(find_similar_process("xyz123", names.iter().copied()).is_none());
    }

    #[test]
    fn test_display() {
        let err = DaemonError::ProcessNotFound(3);
        assert_eq!(err.to_string(), "no process with id 3");

        let err = DaemonError::CronParse {
            expr: "* *".to_string(),
            reason: "expected 5 fields".to_string(),
        };
        assert!(err.to_string().contains("* *"));
        assert!(err.to_string().contains("expected 5 fields"));

        let err = ProtocolError::Truncated {
            wanted: 4,
            remaining: 1,
        };
        assert!(err.to_string().contains("wanted 4"));
    }
}
