//! Container execution backends for Jaypore CI.
//!
//! The Docker executor is the real one; the mock executor backs scheduler
//! tests.

pub mod docker;
pub mod mock;

pub use docker::DockerExecutor;
pub use mock::MockExecutor;
