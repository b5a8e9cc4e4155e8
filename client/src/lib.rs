//! Typed client for the governed tool.
//!
//! Builds on [`lantern_transport`]: each operation maps to a fixed argument
//! array, exit codes are interpreted per command, and stdout is decoded into
//! the payload types from [`lantern_types`]. Optional subcommands are
//! discovered by probing once per executable.

#![allow(clippy::missing_errors_doc)]

mod capabilities;
mod client;
pub mod commands;
mod error;
mod exit_policy;
mod in_flight;
pub mod poll;

pub use client::CommandClient;
pub use commands::{CommandSpec, TimeoutClass};
pub use error::{ClientError, ErrorKind};
pub use exit_policy::ExitPolicy;
pub use in_flight::{InFlightRegistry, InFlightSlot};
pub use poll::{
    AlertTransition, CORRELATOR_POLL_KEY, CorrelatorSignal, Hysteresis, HysteresisConfig,
    PollCoordinator, PollOutcome, PollSignal, PollState, TickOutcome,
};
