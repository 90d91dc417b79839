//! Frame sinks for the receiver

use std::io::{self, Write};

use crate::protocol::Frame;

/// Consumes accepted frames
pub trait FrameSink {
    /// Append one frame's content. Returns the bytes written.
    fn accept(&mut self, frame: &Frame) -> io::Result<usize>;

    /// Flush anything buffered
    fn finish(&mut self) -> io::Result<()>;
}

/// Appends payload bytes to a writer
pub struct FileSink<W> {
    writer: W,
}

impl<W: Write> FileSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> FrameSink for FileSink<W> {
    fn accept(&mut self, frame: &Frame) -> io::Result<usize> {
        let data = frame.data();
        self.writer.write_all(data)?;
        Ok(data.len())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Writes one `second,counter,x,y,z` line per sample frame
pub struct CsvSink<W> {
    writer: W,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }
}

impl<W: Write> FrameSink for CsvSink<W> {
    fn accept(&mut self, frame: &Frame) -> io::Result<usize> {
        let mut line = String::new();
        if !self.header_written {
            line.push_str("second,counter,x,y,z\n");
            self.header_written = true;
        }
        let s = frame.sample();
        line.push_str(&format!(
            "{},{},{},{},{}\n",
            frame.sequence_second, frame.counter, s.x, s.y, s.z
        ));
        self.writer.write_all(line.as_bytes())?;
        Ok(line.len())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Body, FrameCodec, Sample, TransferMode};

    #[test]
    fn test_file_sink_writes_payload_only() {
        let codec = FrameCodec::new(TransferMode::File);
        let mut out = Vec::new();
        let mut sink = FileSink::new(&mut out);

        for chunk in [&b"hello "[..], &b"world"[..]] {
            let frame = codec.encode(0, 0, Body::Bytes(chunk)).unwrap();
            sink.accept(&frame).unwrap();
        }
        sink.finish().unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_csv_sink() {
        let codec = FrameCodec::new(TransferMode::Sensor);
        let mut out = Vec::new();
        let mut sink = CsvSink::new(&mut out);

        for counter in 0..2 {
            let frame = codec
                .encode(4, counter, Body::Sample(Sample::new(100, -50, 0)))
                .unwrap();
            sink.accept(&frame).unwrap();
        }
        sink.finish().unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "second,counter,x,y,z\n4,0,100,-50,0\n4,1,100,-50,0\n");
    }

    #[test]
    fn test_file_sink_on_disk() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let codec = FrameCodec::new(TransferMode::File);
        let frame = codec.encode(0, 0, Body::Bytes(b"abc")).unwrap();

        let mut sink = FileSink::new(file.reopen().unwrap());
        assert_eq!(sink.accept(&frame).unwrap(), 3);
        sink.finish().unwrap();

        assert_eq!(std::fs::read(file.path()).unwrap(), b"abc");
    }
}
