//! sealpost CLI - operator tooling for sealpost envelopes
//!
//! This crate provides a command-line interface for:
//! - Generating key pairs and their publishable key records
//! - Sealing payloads for a counterparty and opening envelopes sent to us
//! - Inspecting tokens without verifying them
//! - Sending sealed requests over HTTP

pub mod cli;

pub use cli::Cli;

use sealpost_core::EnvelopeError;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Verification failed - malformed, forged or expired envelope
/// - 3: No key found for the signer or destination
/// - 4: Connection failed - transport error or error status
/// - 5: Invalid input - bad arguments or unrecognised content
/// - 6: Cryptography failed - sealing or opening the payload failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    VerificationFailed = 2,
    NoKeyFound = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    CryptographyFailed = 6,
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Exit code for a failed command, based on the envelope error behind it.
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<EnvelopeError>() {
            Some(EnvelopeError::InvalidResponse { .. }) => ExitCode::VerificationFailed,
            Some(EnvelopeError::NoKeyFound { .. }) => ExitCode::NoKeyFound,
            Some(EnvelopeError::Communication(_)) => ExitCode::ConnectionFailed,
            Some(EnvelopeError::InvalidRequest(_)) => ExitCode::InvalidInput,
            Some(EnvelopeError::Cryptography(_)) => ExitCode::CryptographyFailed,
            None => ExitCode::GeneralError,
        }
    }
}
