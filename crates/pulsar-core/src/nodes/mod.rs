//! Built-in nodes.
//!
//! Sources, [`Gain`] and [`Sink`] compile to dedicated opcodes and never
//! run themselves. [`Amplifier`] and [`EventLog`] are ordinary processor
//! nodes invoked through `CALL`.

mod processors;
mod sink;
mod sources;

pub use processors::{Amplifier, EventLog};
pub use sink::Sink;
pub use sources::{ConstantSource, EntitySource, Gain, NoiseSource, SineSource};
