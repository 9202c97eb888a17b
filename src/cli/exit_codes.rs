//! CLI Exit Codes
//!
//! Stable exit codes so scripts can tell a missing meter from a wrong
//! password or a dead dongle.

use crate::core::transport::TransportError;
use crate::error::Error;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Dongle could not be opened or the link is gone
    pub const CONNECTION_FAILED: u8 = 3;

    /// Dongle or meter did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// PANA authentication failed
    pub const AUTH_FAILED: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Malformed or unexpected packet, rejected command
    pub const PROTOCOL_ERROR: u8 = 9;

    /// The dongle refused to send a UDP datagram
    pub const SEND_FAILED: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// No meter found by the active scan
    pub const METER_NOT_FOUND: u8 = 12;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Every code, ascending
    pub const ALL: [u8; 13] = [0, 1, 2, 3, 4, 5, 7, 8, 9, 10, 11, 12, 14];
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Exit code for a library error
pub fn error_code(err: &Error) -> u8 {
    match err {
        Error::Configuration(_) => ExitCodes::CONFIG_ERROR,
        Error::Channel(TransportError::PortNotFound(_)) => ExitCodes::PORT_NOT_FOUND,
        Error::Channel(TransportError::PermissionDenied(_)) => ExitCodes::PERMISSION_DENIED,
        Error::Channel(_) | Error::NoAddress | Error::NotConnected | Error::InvalidState(_) => {
            ExitCodes::CONNECTION_FAILED
        }
        Error::Codec(_) | Error::CommandRejected { .. } | Error::UnexpectedReply(_) => ExitCodes::PROTOCOL_ERROR,
        Error::NoMeterFound => ExitCodes::METER_NOT_FOUND,
        Error::AuthenticationFailed => ExitCodes::AUTH_FAILED,
        Error::SendTimeout(_) | Error::ResponseTimeout { .. } | Error::CommandTimeout(_) => ExitCodes::TIMEOUT,
        Error::SendFailure(_) => ExitCodes::SEND_FAILED,
        Error::Cancelled => ExitCodes::CANCELLED,
        Error::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
    }
}

impl From<&Error> for CliResult {
    fn from(err: &Error) -> Self {
        Self::Error(error_code(err), err.to_string())
    }
}

/// Exit code for an I/O error outside the library (record files, port listing)
pub fn io_error_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::PORT_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::TimedOut => ExitCodes::TIMEOUT,
        _ => ExitCodes::ERROR,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_error_code(&err), err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Timeout",
        5 => "Authentication failed",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        10 => "Send failed",
        11 => "Operation cancelled",
        12 => "Meter not found",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL.into_iter().chain([ExitCodes::INTERNAL_ERROR]) {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
