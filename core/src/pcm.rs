//! Uncompressed PCM container access.
//!
//! Wraps `hound` behind a per-sample interface: reads return the first
//! channel upscaled to the signed 32-bit reference range regardless of the
//! container's bit depth, writes downscale from the same range. The stream
//! position is tracked in samples so callers can report positions in
//! milliseconds of tape time.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{Result, TapeError};

/// Shift that maps a sample of the given depth into the 32-bit range.
fn depth_shift(bits_per_sample: u16) -> u32 {
    8 * (4 - (u32::from(bits_per_sample) + 7) / 8)
}

pub struct PcmReader<R: Read> {
    reader: WavReader<R>,
    channels: u16,
    bits_per_sample: u16,
    sample_rate: u32,
    position: u64,
}

impl PcmReader<BufReader<File>> {
    /// Open a wave file; channel count, bit depth and sample rate come from
    /// the container's format section.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(WavReader::open(path)?)
    }
}

impl<R: Read> PcmReader<R> {
    pub fn new(reader: WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int {
            return Err(TapeError::BadFormat);
        }
        Ok(Self {
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            sample_rate: spec.sample_rate,
            position: 0,
            reader,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Stream position in samples read so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Stream position in milliseconds of audio.
    pub fn position_millis(&self) -> u64 {
        self.position * 1000 / u64::from(self.sample_rate)
    }

    /// Read the next sample, first channel, upscaled to 32 bits signed.
    /// Remaining channels of the same frame are skipped. `None` marks the
    /// end of the data section.
    pub fn read_sample(&mut self) -> Result<Option<i32>> {
        let shift = depth_shift(self.bits_per_sample);
        let mut first = None;
        for channel in 0..self.channels {
            match self.reader.samples::<i32>().next() {
                Some(Ok(raw)) => {
                    if channel == 0 {
                        first = Some(raw << shift);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
        self.position += 1;
        Ok(first)
    }
}

pub struct PcmWriter<W: Write + Seek> {
    writer: WavWriter<W>,
    channels: u16,
    bits_per_sample: u16,
    sample_rate: u32,
    position: u64,
}

impl PcmWriter<BufWriter<File>> {
    /// Create a wave file with the given format. The container's size fields
    /// are only correct after [`PcmWriter::finalize`].
    pub fn create<P: AsRef<Path>>(
        path: P,
        channels: u16,
        bits_per_sample: u16,
        sample_rate: u32,
    ) -> Result<Self> {
        let spec = Self::spec_for(channels, bits_per_sample, sample_rate)?;
        Ok(Self::from_writer(WavWriter::create(path, spec)?, spec))
    }
}

impl<W: Write + Seek> PcmWriter<W> {
    pub fn new(writer: W, channels: u16, bits_per_sample: u16, sample_rate: u32) -> Result<Self> {
        let spec = Self::spec_for(channels, bits_per_sample, sample_rate)?;
        Ok(Self::from_writer(WavWriter::new(writer, spec)?, spec))
    }

    fn spec_for(channels: u16, bits_per_sample: u16, sample_rate: u32) -> Result<WavSpec> {
        if channels == 0 || bits_per_sample == 0 || bits_per_sample > 32 || sample_rate == 0 {
            return Err(TapeError::InvalidConfig(format!(
                "unusable wave format: {} channels, {} bits, {} samples/sec",
                channels, bits_per_sample, sample_rate
            )));
        }
        Ok(WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format: SampleFormat::Int,
        })
    }

    fn from_writer(writer: WavWriter<W>, spec: WavSpec) -> Self {
        Self {
            writer,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            sample_rate: spec.sample_rate,
            position: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn position_millis(&self) -> u64 {
        self.position * 1000 / u64::from(self.sample_rate)
    }

    /// Write one sample, given in the 32-bit reference range, to every
    /// channel of the stream.
    pub fn write_sample(&mut self, value: i32) -> Result<()> {
        let scaled = value >> depth_shift(self.bits_per_sample);
        for _ in 0..self.channels {
            self.writer.write_sample(scaled)?;
        }
        self.position += 1;
        Ok(())
    }

    /// Rewrite the container's size fields and close the stream. Dropping
    /// the writer instead would still attempt the rewrite but lose any
    /// error.
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav(bits_per_sample: u16, samples: &[i32]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = PcmWriter::new(&mut buf, 1, bits_per_sample, 22_050).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_eight_bit_roundtrip() {
        let values = [0, 100 << 24, -100 << 24, 127 << 24, -128 << 24];
        let bytes = make_wav(8, &values);

        let mut reader = PcmReader::new(WavReader::new(Cursor::new(bytes)).unwrap()).unwrap();
        assert_eq!(reader.channels(), 1);
        assert_eq!(reader.bits_per_sample(), 8);
        for &expected in &values {
            assert_eq!(reader.read_sample().unwrap(), Some(expected));
        }
        assert_eq!(reader.read_sample().unwrap(), None);
    }

    #[test]
    fn test_sixteen_bit_scaling() {
        let bytes = make_wav(16, &[0x1234 << 16, -(0x1234 << 16)]);

        let mut reader = PcmReader::new(WavReader::new(Cursor::new(bytes)).unwrap()).unwrap();
        assert_eq!(reader.read_sample().unwrap(), Some(0x1234 << 16));
        assert_eq!(reader.read_sample().unwrap(), Some(-(0x1234 << 16)));
        assert_eq!(reader.read_sample().unwrap(), None);
    }

    #[test]
    fn test_first_channel_of_stereo() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut buf, spec).unwrap();
            for frame in [[100i16, -100], [200, -200]] {
                for s in frame {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }

        let mut reader =
            PcmReader::new(WavReader::new(Cursor::new(buf.into_inner())).unwrap()).unwrap();
        assert_eq!(reader.read_sample().unwrap(), Some(100 << 16));
        assert_eq!(reader.read_sample().unwrap(), Some(200 << 16));
        assert_eq!(reader.read_sample().unwrap(), None);
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_float_container_rejected() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut buf, spec).unwrap();
            writer.write_sample(0.5f32).unwrap();
            writer.finalize().unwrap();
        }

        let result = PcmReader::new(WavReader::new(Cursor::new(buf.into_inner())).unwrap());
        assert!(matches!(result, Err(TapeError::BadFormat)));
    }

    #[test]
    fn test_foreign_container_rejected() {
        let result = WavReader::new(Cursor::new(b"RIFX\x04\x00\x00\x00AIFF".to_vec()))
            .map_err(TapeError::from);
        assert!(matches!(result, Err(TapeError::BadFormat)));
    }

    #[test]
    fn test_position_millis() {
        let bytes = make_wav(8, &[0; 2205]);
        let mut reader = PcmReader::new(WavReader::new(Cursor::new(bytes)).unwrap()).unwrap();
        while reader.read_sample().unwrap().is_some() {}
        assert_eq!(reader.position(), 2205);
        assert_eq!(reader.position_millis(), 100);
    }

    #[test]
    fn test_invalid_write_format_rejected() {
        let result = PcmWriter::new(Cursor::new(Vec::new()), 0, 8, 22_050);
        assert!(matches!(result, Err(TapeError::InvalidConfig(_))));
        let result = PcmWriter::new(Cursor::new(Vec::new()), 1, 33, 22_050);
        assert!(matches!(result, Err(TapeError::InvalidConfig(_))));
    }
}
