//! Data sources feeding the transmitter

use std::io::{self, Read};

use super::SensorDriver;
use crate::protocol::{Body, TransferMode, PAYLOAD_SIZE};

/// Supplies one frame body at a time
pub trait DataSource {
    /// Mode of the frames this source produces
    fn mode(&self) -> TransferMode;

    /// Next body, or `None` once the source is exhausted
    fn next_body(&mut self) -> io::Result<Option<Body<'_>>>;
}

/// Reads a byte stream in payload-sized chunks
pub struct FileSource<R> {
    reader: R,
    chunk: [u8; PAYLOAD_SIZE],
    exhausted: bool,
}

impl<R: Read> FileSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            chunk: [0u8; PAYLOAD_SIZE],
            exhausted: false,
        }
    }

    /// Fill the chunk as far as the reader allows
    fn fill(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < PAYLOAD_SIZE {
            match self.reader.read(&mut self.chunk[filled..]) {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> DataSource for FileSource<R> {
    fn mode(&self) -> TransferMode {
        TransferMode::File
    }

    fn next_body(&mut self) -> io::Result<Option<Body<'_>>> {
        if self.exhausted {
            return Ok(None);
        }
        let filled = self.fill()?;
        if filled == 0 {
            return Ok(None);
        }
        Ok(Some(Body::Bytes(&self.chunk[..filled])))
    }
}

/// Pulls samples from a sensor driver, optionally a bounded number
pub struct SensorSource<D> {
    driver: D,
    remaining: Option<u64>,
}

impl<D: SensorDriver> SensorSource<D> {
    /// `limit` of `None` samples until cancelled
    pub fn new(driver: D, limit: Option<u64>) -> Self {
        Self {
            driver,
            remaining: limit,
        }
    }
}

impl<D: SensorDriver> DataSource for SensorSource<D> {
    fn mode(&self) -> TransferMode {
        TransferMode::Sensor
    }

    fn next_body(&mut self) -> io::Result<Option<Body<'_>>> {
        match self.remaining.as_mut() {
            Some(0) => return Ok(None),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        Ok(Some(Body::Sample(self.driver.sample())))
    }
}
