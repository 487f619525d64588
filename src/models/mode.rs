use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// How the expert(s) answering a request are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SelectionStrategy {
    Manual,
    Automatic,
}

/// Whether the caller drives the run turn by turn or hands it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStyle {
    Interactive,
    Autonomous,
}

/// The four orchestration modes. Declaration order is the mode number.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    ManualInteractive,
    AutomaticInteractive,
    ManualAutonomous,
    AutomaticAutonomous,
}

/// Indexed by `[selection][execution]`, with `Manual`/`Interactive` at 0.
const CAPABILITY_GRID: [[Mode; 2]; 2] = [
    [Mode::ManualInteractive, Mode::ManualAutonomous],
    [Mode::AutomaticInteractive, Mode::AutomaticAutonomous],
];

impl Mode {
    pub fn from_capabilities(selection: SelectionStrategy, execution: ExecutionStyle) -> Self {
        let row = match selection {
            SelectionStrategy::Manual => 0,
            SelectionStrategy::Automatic => 1,
        };
        let col = match execution {
            ExecutionStyle::Interactive => 0,
            ExecutionStyle::Autonomous => 1,
        };
        CAPABILITY_GRID[row][col]
    }

    pub fn selection(self) -> SelectionStrategy {
        match self {
            Mode::ManualInteractive | Mode::ManualAutonomous => SelectionStrategy::Manual,
            Mode::AutomaticInteractive | Mode::AutomaticAutonomous => SelectionStrategy::Automatic,
        }
    }

    pub fn execution(self) -> ExecutionStyle {
        match self {
            Mode::ManualInteractive | Mode::AutomaticInteractive => ExecutionStyle::Interactive,
            Mode::ManualAutonomous | Mode::AutomaticAutonomous => ExecutionStyle::Autonomous,
        }
    }

    /// Mode number as shown in the product (1–4).
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    /// Canonical external identifier, e.g. `manual-interactive`.
    pub fn id(self) -> &'static str {
        self.into()
    }

    pub fn is_interactive(self) -> bool {
        self.execution() == ExecutionStyle::Interactive
    }
}

/// What happens when a pending checkpoint outlives its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Fail the job with `CheckpointTimeout`.
    FailJob,
    /// Resume the engine with a `timed_out` resolution.
    AutoContinue,
}

/// What happens when a reviewer rejects a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectAction {
    /// Fail the job with `CheckpointRejected`.
    FailJob,
    /// Hand the rejection to the engine and keep running.
    ResumeEngine,
}

/// Per-mode human-in-the-loop policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePolicy {
    #[serde(with = "duration_secs")]
    pub checkpoint_timeout: Option<Duration>,
    pub on_timeout: TimeoutAction,
    pub on_reject: RejectAction,
}

/// Static description of a mode, served to operators and UIs.
#[derive(Debug, Clone, Serialize)]
pub struct ModeDescriptor {
    pub id: Mode,
    pub number: u8,
    pub selection: SelectionStrategy,
    pub execution: ExecutionStyle,
    pub policy: ModePolicy,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
