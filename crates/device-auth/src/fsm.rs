//! Device login state machine.
//!
//! ```text
//! Init ──CodeIssued──► AwaitingAuthorization ──Authorized──► Succeeded
//!   │                    │  ▲
//!   │                    │  └── Pending / SlowDown
//!   │                    ├──AccessDenied──► Denied
//!   └──Failure──►        └──Failure──────► Failed
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub device_login(Init)

    Init => {
        CodeIssued => AwaitingAuthorization,
        Failure => Failed
    },
    AwaitingAuthorization => {
        Pending => AwaitingAuthorization,
        SlowDown => AwaitingAuthorization,
        Authorized => Succeeded,
        AccessDenied => Denied,
        Failure => Failed
    }
}

pub use device_login::Input as DeviceLoginInput;
pub use device_login::State as DeviceLoginState;
pub use device_login::StateMachine as DeviceLoginMachine;

/// Login progress for observers (CLI output, status endpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceLoginStatus {
    NotStarted,
    AwaitingAuthorization,
    Succeeded,
    Denied,
    Failed,
}

impl From<&DeviceLoginState> for DeviceLoginStatus {
    fn from(state: &DeviceLoginState) -> Self {
        match state {
            DeviceLoginState::Init => DeviceLoginStatus::NotStarted,
            DeviceLoginState::AwaitingAuthorization => DeviceLoginStatus::AwaitingAuthorization,
            DeviceLoginState::Succeeded => DeviceLoginStatus::Succeeded,
            DeviceLoginState::Denied => DeviceLoginStatus::Denied,
            DeviceLoginState::Failed => DeviceLoginStatus::Failed,
        }
    }
}

impl DeviceLoginStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceLoginStatus::Succeeded | DeviceLoginStatus::Denied | DeviceLoginStatus::Failed
        )
    }
}
