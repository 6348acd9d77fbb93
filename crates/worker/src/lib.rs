//! Background dispatch worker.

pub mod runner;
