//! Device-authorization login.
//!
//! The client asks the login server for a device code, shows the user a
//! short code and a verification URL, then polls the token endpoint at the
//! server-directed interval until the user approves or denies the request.
//! An approved credential is written to the token cache.

mod error;
mod flow;
mod fsm;
#[cfg(test)]
mod test_server;

pub use error::{DeviceAuthError, DeviceAuthResult};
pub use flow::{
    DeviceAuthFlow, DeviceAuthorization, DEVICE_CODE_GRANT_TYPE, DEVICE_CODE_PATH,
    DEVICE_TOKEN_PATH,
};
pub use fsm::{DeviceLoginInput, DeviceLoginMachine, DeviceLoginState, DeviceLoginStatus};
