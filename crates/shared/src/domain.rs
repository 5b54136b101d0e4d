use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);

/// Opaque identifier the region assigns to every managed machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemId(pub String);

impl SystemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Lifecycle status of a machine. The numeric codes are the wire values the
/// region reports in `status_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    New,
    Commissioning,
    FailedCommissioning,
    Missing,
    Ready,
    Reserved,
    Deployed,
    Retired,
    Broken,
    Deploying,
    Allocated,
    FailedDeployment,
    Releasing,
    FailedReleasing,
    DiskErasing,
    FailedDiskErasing,
    RescueMode,
    EnteringRescueMode,
    FailedEnteringRescueMode,
    ExitingRescueMode,
    FailedExitingRescueMode,
    Testing,
    FailedTesting,
}

impl MachineStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        let status = match code {
            0 => Self::New,
            1 => Self::Commissioning,
            2 => Self::FailedCommissioning,
            3 => Self::Missing,
            4 => Self::Ready,
            5 => Self::Reserved,
            6 => Self::Deployed,
            7 => Self::Retired,
            8 => Self::Broken,
            9 => Self::Deploying,
            10 => Self::Allocated,
            11 => Self::FailedDeployment,
            12 => Self::Releasing,
            13 => Self::FailedReleasing,
            14 => Self::DiskErasing,
            15 => Self::FailedDiskErasing,
            16 => Self::RescueMode,
            17 => Self::EnteringRescueMode,
            18 => Self::FailedEnteringRescueMode,
            19 => Self::ExitingRescueMode,
            20 => Self::FailedExitingRescueMode,
            21 => Self::Testing,
            22 => Self::FailedTesting,
            _ => return None,
        };
        Some(status)
    }

    pub fn code(self) -> i64 {
        match self {
            Self::New => 0,
            Self::Commissioning => 1,
            Self::FailedCommissioning => 2,
            Self::Missing => 3,
            Self::Ready => 4,
            Self::Reserved => 5,
            Self::Deployed => 6,
            Self::Retired => 7,
            Self::Broken => 8,
            Self::Deploying => 9,
            Self::Allocated => 10,
            Self::FailedDeployment => 11,
            Self::Releasing => 12,
            Self::FailedReleasing => 13,
            Self::DiskErasing => 14,
            Self::FailedDiskErasing => 15,
            Self::RescueMode => 16,
            Self::EnteringRescueMode => 17,
            Self::FailedEnteringRescueMode => 18,
            Self::ExitingRescueMode => 19,
            Self::FailedExitingRescueMode => 20,
            Self::Testing => 21,
            Self::FailedTesting => 22,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    Error,
    Unknown,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw hardware-test result code. `-1` means the suite never ran and `2`
/// means it passed; every other value needs operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStatus(pub i64);

impl TestStatus {
    pub const NOT_RUN: TestStatus = TestStatus(-1);
    pub const PASSED: TestStatus = TestStatus(2);

    pub fn requires_attention(self) -> bool {
        self != Self::NOT_RUN && self != Self::PASSED
    }
}

/// Every lifecycle action a machine can be asked to perform, with its wire
/// name and the phrase used when reporting a failure to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Abort,
    Acquire,
    Check,
    Commission,
    Deploy,
    ExitRescueMode,
    Lock,
    MarkBroken,
    MarkFixed,
    Off,
    On,
    OverrideFailedTesting,
    Release,
    RescueMode,
    SetPool,
    SetZone,
    Test,
    Unlock,
}

impl Action {
    pub const ALL: [Action; 18] = [
        Action::Abort,
        Action::Acquire,
        Action::Check,
        Action::Commission,
        Action::Deploy,
        Action::ExitRescueMode,
        Action::Lock,
        Action::MarkBroken,
        Action::MarkFixed,
        Action::Off,
        Action::On,
        Action::OverrideFailedTesting,
        Action::Release,
        Action::RescueMode,
        Action::SetPool,
        Action::SetZone,
        Action::Test,
        Action::Unlock,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Acquire => "acquire",
            Self::Check => "check",
            Self::Commission => "commission",
            Self::Deploy => "deploy",
            Self::ExitRescueMode => "exit-rescue-mode",
            Self::Lock => "lock",
            Self::MarkBroken => "mark-broken",
            Self::MarkFixed => "mark-fixed",
            Self::Off => "off",
            Self::On => "on",
            Self::OverrideFailedTesting => "override-failed-testing",
            Self::Release => "release",
            Self::RescueMode => "rescue-mode",
            Self::SetPool => "set-pool",
            Self::SetZone => "set-zone",
            Self::Test => "test",
            Self::Unlock => "unlock",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.name() == name)
    }

    /// Phrase completing "Unable to ..." in failure notifications.
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Abort => "abort action for machine",
            Self::Acquire => "acquire machine",
            Self::Check => "check power state of machine",
            Self::Commission => "commission machine",
            Self::Deploy => "deploy machine",
            Self::ExitRescueMode => "exit rescue mode for machine",
            Self::Lock => "lock machine",
            Self::MarkBroken => "mark machine broken",
            Self::MarkFixed => "mark machine fixed",
            Self::Off => "power off machine",
            Self::On => "power on machine",
            Self::OverrideFailedTesting => "override failed testing on machine",
            Self::Release => "release machine",
            Self::RescueMode => "enter rescue mode on machine",
            Self::SetPool => "set pool of machine",
            Self::SetZone => "set zone of machine",
            Self::Test => "test machine",
            Self::Unlock => "unlock machine",
        }
    }

    /// Power actions share one transition flag instead of a per-name flag,
    /// and their pending state is reconciled against observed power changes.
    pub fn is_power_action(self) -> bool {
        matches!(self, Self::On | Self::Off | Self::Check)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
