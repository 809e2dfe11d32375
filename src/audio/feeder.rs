//! Raw 16-bit PCM feeder
//!
//! Reads headerless mono `i16` little-endian samples from a byte stream
//! (standard input in practice) and converts them to `f32` in `[-1, 1)`.

use std::io::{self, Read};

use super::buffer::AudioBuffer;

pub const BYTES_PER_SAMPLE: usize = 2;

/// Outcome of one fill request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Data was read; the stream may have more
    More,
    /// The stream returned no data at all for this request
    EndOfStream,
}

impl FeedStatus {
    pub fn is_more(self) -> bool {
        self == Self::More
    }
}

/// Decode little-endian `i16` samples from `raw` into `dest`
pub fn decode_i16_le(raw: &[u8], dest: &mut [f32]) {
    for (sample, bytes) in dest.iter_mut().zip(raw.chunks_exact(BYTES_PER_SAMPLE)) {
        *sample = i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0;
    }
}

/// Read until `buf` is full or the reader reports end of stream.
///
/// Returns the number of bytes read. Errors other than `Interrupted` are
/// returned as-is; whatever was read before them is lost to the caller.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fills the playback buffer from a PCM byte stream
pub struct PcmFeeder<R> {
    reader: R,
    raw: Vec<u8>,
    decoded: Vec<f32>,
    bytes_read: u64,
}

impl<R: Read> PcmFeeder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            raw: Vec::new(),
            decoded: Vec::new(),
            bytes_read: 0,
        }
    }

    /// Total bytes consumed from the stream so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Decode exactly `dest.len()` samples into `dest`.
    ///
    /// A short read is padded with silence. Returns `EndOfStream` only when
    /// nothing at all could be read.
    pub fn fill(&mut self, dest: &mut [f32]) -> FeedStatus {
        let bytes = dest.len() * BYTES_PER_SAMPLE;
        self.raw.clear();
        self.raw.resize(bytes, 0);

        let read = match read_full(&mut self.reader, &mut self.raw) {
            Ok(n) => n,
            Err(e) => {
                log::error!("Failed to read input: {}", e);
                0
            }
        };
        self.bytes_read += read as u64;

        if read < bytes {
            self.raw[read..].fill(0);
        }
        decode_i16_le(&self.raw, dest);

        if read == 0 {
            log::info!("End of file on input");
            FeedStatus::EndOfStream
        } else {
            FeedStatus::More
        }
    }

    /// Decode `samples` samples into `buffer` starting at `offset`
    pub fn fill_buffer(
        &mut self,
        buffer: &AudioBuffer,
        offset: usize,
        samples: usize,
    ) -> FeedStatus {
        let mut decoded = std::mem::take(&mut self.decoded);
        decoded.clear();
        decoded.resize(samples, 0.0);

        let status = self.fill(&mut decoded);
        buffer.write(offset, &decoded);

        self.decoded = decoded;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Reader that hands out at most `chunk` bytes per call
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        interrupted: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    #[test]
    fn test_decode_scale() {
        let raw = pcm(&[0, 16384, -16384, i16::MAX, i16::MIN]);
        let mut out = [9.0; 5];
        decode_i16_le(&raw, &mut out);
        assert_eq!(out, [0.0, 0.5, -0.5, 32767.0 / 32768.0, -1.0]);
    }

    #[test]
    fn test_decode_is_monotonic() {
        let values: Vec<i16> = (i16::MIN..=i16::MAX).step_by(97).collect();
        let mut out = vec![0.0; values.len()];
        decode_i16_le(&pcm(&values), &mut out);

        for (value, decoded) in values.iter().zip(&out) {
            assert_eq!(*decoded, *value as f32 / 32768.0);
            assert!((-1.0..1.0).contains(decoded));
        }
        assert!(out.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_short_read_is_zero_filled() {
        // 4 bytes for a 10 sample request
        let mut feeder = PcmFeeder::new(Cursor::new(pcm(&[8192, -8192])));
        let mut out = [5.0; 10];

        assert_eq!(feeder.fill(&mut out), FeedStatus::More);
        assert_eq!(out[0], 0.25);
        assert_eq!(out[1], -0.25);
        assert!(out[2..].iter().all(|&s| s == 0.0));
        assert_eq!(feeder.bytes_read(), 4);
    }

    #[test]
    fn test_empty_read_is_end_of_stream() {
        let mut feeder = PcmFeeder::new(Cursor::new(Vec::new()));
        let mut out = [5.0; 4];

        assert_eq!(feeder.fill(&mut out), FeedStatus::EndOfStream);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_end_of_stream_after_last_window() {
        let mut feeder = PcmFeeder::new(Cursor::new(vec![0u8; 8]));
        let mut out = [1.0; 4];

        assert!(feeder.fill(&mut out).is_more());
        assert_eq!(out, [0.0; 4]);
        assert_eq!(feeder.fill(&mut out), FeedStatus::EndOfStream);
    }

    #[test]
    fn test_odd_trailing_byte() {
        let mut feeder = PcmFeeder::new(Cursor::new(vec![0x00, 0x40, 0x01]));
        let mut out = [3.0; 2];

        assert!(feeder.fill(&mut out).is_more());
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], 1.0 / 32768.0);
    }

    #[test]
    fn test_trickling_reader_fills_completely() {
        let samples: Vec<i16> = (0..32).map(|i| i * 100).collect();
        let mut feeder = PcmFeeder::new(Trickle {
            data: pcm(&samples),
            pos: 0,
            chunk: 3,
            interrupted: false,
        });
        let mut out = [0.0; 32];

        assert!(feeder.fill(&mut out).is_more());
        for (value, decoded) in samples.iter().zip(&out) {
            assert_eq!(*decoded, *value as f32 / 32768.0);
        }
    }

    #[test]
    fn test_read_error_ends_stream() {
        let mut feeder = PcmFeeder::new(Broken);
        let mut out = [2.0; 3];
        assert_eq!(feeder.fill(&mut out), FeedStatus::EndOfStream);
        assert_eq!(out, [0.0; 3]);
    }

    #[test]
    fn test_fill_buffer_at_offset() {
        let buffer = AudioBuffer::new(8);
        let mut feeder = PcmFeeder::new(Cursor::new(pcm(&[16384, 16384])));

        assert!(feeder.fill_buffer(&buffer, 4, 4).is_more());

        let mut out = [9.0; 8];
        buffer.read_into(0, &mut out);
        assert_eq!(out, [0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
    }
}
