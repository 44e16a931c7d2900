//! Channel open parameters and the device-variant table.
//!
//! The baud rate selects not only the bit rate but, through the table below,
//! the carrier frequency, the sample rate written to new tapes, and the
//! device family's wave-shape variant. A negated baud rate selects inverted
//! phase.

use std::env;

use crate::error::{Result, TapeError};

/// Environment variable overriding the classification threshold divisor.
pub const THRESHOLD_ENV: &str = "KCSTAPE_THRESHOLD";

/// Environment variable enabling rolling DC-bias tracking.
pub const AUTOBIAS_ENV: &str = "KCSTAPE_AUTOBIAS";

/// Default divisor: samples within 1/10th of full scale count as mid-band.
pub const DEFAULT_THRESHOLD_DIVISOR: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
    None,
}

impl Parity {
    pub fn from_char(c: char) -> Result<Self> {
        match c.to_ascii_uppercase() {
            'E' => Ok(Parity::Even),
            'O' => Ok(Parity::Odd),
            'N' => Ok(Parity::None),
            other => Err(TapeError::InvalidConfig(format!(
                "parity must be one of E, O or N, got {:?}",
                other
            ))),
        }
    }
}

/// Wave-shape variant of a device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVariant {
    /// Classic KCS: a zero is one or more full cycles of the half carrier,
    /// a one is twice as many cycles of the full carrier.
    Standard,
    /// TI-74/95: bits are one or two half-oscillations and the reader
    /// synchronizes on a low-tone lead-in.
    HalfWave,
    /// Sharp graphing series: exactly one wave per bit, so the bit time
    /// derives from the carrier rather than the baud rate.
    SingleWave,
}

/// Immutable modem parameters of one channel, fixed at open time.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub carrier: u32,
    pub variant: DeviceVariant,
    pub invert_phase: bool,
}

impl ChannelConfig {
    /// Validate open parameters and look up the device family. `baud` may be
    /// negated to select inverted phase.
    pub fn new(baud: i32, data_bits: u8, parity: Parity, stop_bits: u8) -> Result<Self> {
        let invert_phase = baud < 0;
        let baud = baud.unsigned_abs();

        if !matches!(baud, 300 | 600 | 1200 | 2400 | 500 | 1500 | 1400) {
            return Err(TapeError::InvalidConfig(format!(
                "unsupported baud rate {}",
                baud
            )));
        }
        if !matches!(data_bits, 4 | 7 | 8) {
            return Err(TapeError::InvalidConfig(format!(
                "data bits must be 4, 7 or 8, got {}",
                data_bits
            )));
        }
        if stop_bits > 4 {
            return Err(TapeError::InvalidConfig(format!(
                "stop bits must be 0 to 4, got {}",
                stop_bits
            )));
        }
        if stop_bits == 0 && parity != Parity::None {
            return Err(TapeError::InvalidConfig(
                "synchronous framing carries no parity bit".into(),
            ));
        }

        let carrier = match baud {
            500 => 4000,  // Sharp pocket computers
            1500 => 2100, // Sharp graphing series
            1400 => 1400, // TI-74/95
            2400 => 4800, // high speed
            _ => 2400,    // normal or fast
        };
        let variant = if carrier == baud {
            DeviceVariant::HalfWave
        } else if carrier < 2 * baud {
            DeviceVariant::SingleWave
        } else {
            DeviceVariant::Standard
        };

        Ok(Self {
            baud,
            data_bits,
            parity,
            stop_bits,
            carrier,
            variant,
            invert_phase,
        })
    }

    /// Sample rate used when creating a tape image for this rate.
    pub fn preferred_sample_rate(&self) -> u32 {
        match self.baud {
            500 => 16_000,
            2400 => 44_100,
            _ => 22_050,
        }
    }

    /// Full waves (or half-oscillations) carrying one zero bit.
    pub fn waves_per_zero(&self) -> usize {
        match self.variant {
            DeviceVariant::Standard => (self.carrier / 2 / self.baud) as usize,
            _ => 1,
        }
    }

    /// Full waves (or half-oscillations) carrying one one bit.
    pub fn waves_per_one(&self) -> usize {
        match self.variant {
            DeviceVariant::Standard => (self.carrier / self.baud) as usize,
            DeviceVariant::HalfWave => 2,
            DeviceVariant::SingleWave => 1,
        }
    }

    /// Nominal duration of one bit in samples.
    pub fn bit_length(&self, sample_rate: u32) -> usize {
        match self.variant {
            DeviceVariant::SingleWave => (sample_rate / (self.carrier / 2)) as usize,
            _ => (sample_rate / self.baud) as usize,
        }
    }

    /// Whether the lead-in is a low-frequency tone rather than carrier.
    pub fn sync_on_zero(&self) -> bool {
        self.variant == DeviceVariant::HalfWave
    }

    /// Width of one transmitted frame in bits.
    pub fn frame_bits(&self) -> usize {
        let start = usize::from(self.stop_bits != 0);
        let parity = usize::from(self.parity != Parity::None);
        start + usize::from(self.data_bits) + parity + usize::from(self.stop_bits)
    }
}

/// Process-wide tuning knobs, read once when a channel is opened.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    /// The classification threshold is full scale divided by this.
    pub threshold_divisor: i64,
    /// Track and subtract a rolling DC bias estimate while reading.
    pub auto_bias: bool,
}

impl Tuning {
    pub fn from_env() -> Self {
        Self::parse(
            env::var(THRESHOLD_ENV).ok().as_deref(),
            env::var(AUTOBIAS_ENV).ok().as_deref(),
        )
    }

    fn parse(threshold: Option<&str>, auto_bias: Option<&str>) -> Self {
        let threshold_divisor = threshold
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|&v| v != 0)
            .unwrap_or(DEFAULT_THRESHOLD_DIVISOR);
        let auto_bias = auto_bias
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|v| v != 0)
            .unwrap_or(false);
        Self {
            threshold_divisor,
            auto_bias,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            threshold_divisor: DEFAULT_THRESHOLD_DIVISOR,
            auto_bias: false,
        }
    }
}
