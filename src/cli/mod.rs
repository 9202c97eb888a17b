//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text/JSON rendering of meter readings

pub mod exit_codes;
pub mod output;

pub use exit_codes::{error_code, exit_code_description, io_error_code, print_exit_codes, CliResult, ExitCodes};
pub use output::{describe_packet, describe_value, kwh, render, OutputFormat};
