//! otakit-services — stateful pieces of the OTA tooling: chunk reassembly,
//! the transport session, the data-block packer, and the MQTT client.

pub mod mqtt;
pub mod packer;
pub mod reassembler;
pub mod session;

pub use reassembler::{ImageReassembler, Progress, ReassemblyError};
pub use session::{Outcome, Session};
