use std::{io, path::PathBuf, process::ExitCode, time::Duration};

use thiserror::Error;

use crate::{discovery::DiscoveryError, mapping::MappingError};

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NOT_FOUND: u8 = 2;
pub const EXIT_RECONNECT_TIMEOUT: u8 = 3;
pub const EXIT_ACQUISITION: u8 = 4;

/// Conditions that end a bridge session.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("failed to grab {path:?} exclusively: {source}")]
    Acquisition {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("virtual gamepad failure: {0}")]
    VirtualDevice(#[source] io::Error),
    #[error("controller did not come back within {0:?}")]
    ReconnectTimeout(Duration),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl BridgeError {
    /// Status a supervisor can tell apart from a crash.
    pub fn exit_code(&self) -> u8 {
        match self {
            BridgeError::Discovery(_) => EXIT_NOT_FOUND,
            BridgeError::ReconnectTimeout(_) => EXIT_RECONNECT_TIMEOUT,
            BridgeError::Acquisition { .. } | BridgeError::VirtualDevice(_) => EXIT_ACQUISITION,
            BridgeError::Mapping(_) => EXIT_FAILURE,
        }
    }
}

impl From<&BridgeError> for ExitCode {
    fn from(e: &BridgeError) -> Self {
        ExitCode::from(e.exit_code())
    }
}
