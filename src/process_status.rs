use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed process. The discriminants are the wire
/// encoding.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIs,
    strum::FromRepr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessStatus {
    Stopped = 0,
    Running = 1,
    Errored = 2,
    Starting = 3,
}

impl ProcessStatus {
    /// Running or waiting on a readiness handshake; either way there is a
    /// live child.
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessStatus::Running | ProcessStatus::Starting)
    }

    pub fn style(&self) -> String {
        let s = self.to_string();
        match self {
            ProcessStatus::Running => console::style(s).green().to_string(),
            ProcessStatus::Starting => console::style(s).yellow().to_string(),
            ProcessStatus::Stopped => console::style(s).dim().to_string(),
            ProcessStatus::Errored => console::style(s).red().to_string(),
        }
    }
}
