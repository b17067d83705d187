// In-memory stand-ins for the kernel subsystems the devices core talks to, plus
// simulated disk controllers. Used by the binary and the tests.

pub mod files;
pub mod hardware;
pub mod machine;
pub mod memory;
pub mod threads;

pub use machine::Machine;
