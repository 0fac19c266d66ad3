//! Host tests against the simulated core.

pub(crate) mod helpers;

mod integration;
mod property;
