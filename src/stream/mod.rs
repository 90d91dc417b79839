//! Stream module - Where frame bodies come from and where they go
//!
//! Provides:
//! - Data sources for the transmitter (file chunks, sensor samples)
//! - Frame sinks for the receiver (raw file, CSV samples)
//! - A synthetic accelerometer for hosts without the ADC

mod sensor;
mod sink;
mod source;

pub use sensor::*;
pub use sink::*;
pub use source::*;
