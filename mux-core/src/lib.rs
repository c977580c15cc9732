#![no_std]

// Portable logic for the Cherry Trail dual-role USB mux.
//
// The crate never touches the standard library so the same arbitration and
// sequencing code runs inside the hosted daemon, the emulator and the tests.

#[macro_use]
mod fmt;

pub mod arbiter;
pub mod control;
pub mod controller;
pub mod driver;
pub mod queue;
pub mod registers;
pub mod signals;
pub mod telemetry;
