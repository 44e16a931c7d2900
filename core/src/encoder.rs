//! Write side of the modem: bit and byte framing onto synthesized tone.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use log::debug;

use crate::config::{ChannelConfig, DeviceVariant, Parity};
use crate::error::Result;
use crate::pcm::PcmWriter;
use crate::synth;

/// Lead-out length appended by [`KcsWriter::finish`], in carrier periods.
const LEAD_OUT_PERIODS: u32 = 4;

/// Trailing silence appended after the shut-off pattern, in samples.
const TRAILING_SILENCE: u64 = 256;

/// A write channel: a PCM stream plus modem configuration and synthesis
/// state.
pub struct KcsWriter<W: Write + Seek> {
    pcm: PcmWriter<W>,
    config: ChannelConfig,
    /// Current polarity. The half-wave devices alternate it between
    /// half-oscillations; everyone else keeps the configured phase.
    phase: bool,
    raw: bool,
}

impl KcsWriter<BufWriter<File>> {
    /// Create a tape image for encoding. The container is always mono 8-bit
    /// at the rate the baud table prescribes.
    pub fn create<P: AsRef<Path>>(
        path: P,
        baud: i32,
        data_bits: u8,
        parity: Parity,
        stop_bits: u8,
    ) -> Result<Self> {
        let config = ChannelConfig::new(baud, data_bits, parity, stop_bits)?;
        let pcm = PcmWriter::create(path, 1, 8, config.preferred_sample_rate())?;
        Ok(Self::new(pcm, config))
    }
}

impl<W: Write + Seek> KcsWriter<W> {
    pub fn new(pcm: PcmWriter<W>, config: ChannelConfig) -> Self {
        let phase = config.invert_phase;
        Self {
            pcm,
            config,
            phase,
            raw: false,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.pcm.sample_rate()
    }

    pub fn position(&self) -> u64 {
        self.pcm.position()
    }

    pub fn position_millis(&self) -> u64 {
        self.pcm.position_millis()
    }

    /// Raw mode suppresses the lead-out on [`KcsWriter::finish`]; used when
    /// copying a tape bit-for-bit, where the source supplies its own.
    pub fn set_raw(&mut self, raw: bool) {
        self.raw = raw;
    }

    /// Write one bit as tone: full carrier for a one, half carrier for a
    /// zero. The slight amplitude difference between the two is deliberate;
    /// it reproduces the analog envelope the original recorders put on tape.
    pub fn write_bit(&mut self, bit: u8) -> Result<()> {
        let carrier = self.config.carrier;
        let freq = if bit != 0 { carrier } else { carrier / 2 };

        match self.config.variant {
            DeviceVariant::HalfWave => {
                let halves = if bit != 0 { 2 } else { 1 };
                for _ in 0..halves {
                    synth::write_half_wave(&mut self.pcm, freq, self.phase)?;
                    self.phase = !self.phase;
                }
                Ok(())
            }
            variant => {
                let periods = if variant == DeviceVariant::SingleWave {
                    1
                } else {
                    freq / self.config.baud
                };
                let amplitude = if bit != 0 { 80 } else { 100 };
                synth::write_wave(&mut self.pcm, freq, periods, amplitude, self.phase)
            }
        }
    }

    /// Write one framed byte: start bit, data bits least significant first,
    /// parity if configured, stop bits. Synchronous configurations carry no
    /// framing bits; their data goes out most significant bit first.
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        if self.config.stop_bits == 0 {
            for index in (0..self.config.data_bits).rev() {
                self.write_bit((byte >> index) & 1)?;
            }
            return Ok(());
        }

        self.write_bit(0)?;

        let mut parity = match self.config.parity {
            Parity::Even => 0u8,
            _ => 1,
        };
        let mut value = byte;
        for _ in 0..self.config.data_bits {
            let bit = value & 1;
            parity ^= bit;
            self.write_bit(bit)?;
            value >>= 1;
        }

        if self.config.parity != Parity::None {
            self.write_bit(parity)?;
        }
        for _ in 0..self.config.stop_bits {
            self.write_bit(1)?;
        }
        Ok(())
    }

    /// Sustain lead-in tone for `tenths` tenths of a second so a reader can
    /// lock on. The half-wave devices lead in with the low tone.
    pub fn write_lead_in(&mut self, tenths: u32) -> Result<()> {
        let freq = self.config.carrier;
        let periods = tenths * (freq / 10);

        if self.config.variant == DeviceVariant::HalfWave {
            for _ in 0..periods {
                synth::write_half_wave(&mut self.pcm, freq / 2, self.phase)?;
                self.phase = !self.phase;
            }
            Ok(())
        } else {
            synth::write_wave(&mut self.pcm, freq, periods, 80, self.phase)
        }
    }

    /// Sustain `periods` cycles of low tone after the last data byte.
    pub fn write_lead_out(&mut self, periods: u32) -> Result<()> {
        synth::write_wave(&mut self.pcm, self.config.carrier / 2, periods, 100, self.phase)
    }

    /// Write raw silence, for carrying silent gaps across a copy.
    pub fn write_silence(&mut self, samples: u64) -> Result<()> {
        synth::write_silence(&mut self.pcm, samples)
    }

    /// Append the lead-out (unless in raw mode), the recorder shut-off
    /// pattern and trailing silence, then finalize the container. Must be
    /// called to obtain a valid tape image.
    pub fn finish(mut self) -> Result<()> {
        if !self.raw {
            self.write_lead_out(LEAD_OUT_PERIODS)?;
        }
        synth::write_shut_off(&mut self.pcm)?;
        synth::write_silence(&mut self.pcm, TRAILING_SILENCE)?;
        debug!("tape image closed at {} ms", self.pcm.position_millis());
        self.pcm.finalize()
    }
}
