//! Waveform synthesis for the write side of the modem.
//!
//! Tones are not pure sines: each cycle interpolates linearly between the
//! fixed sample points below, which reproduce the shape the original tape
//! interfaces put on cassette. Timing is integer-exact; a cycle keeps
//! emitting samples past its nominal length until the table pointer reaches
//! the late zero crossing, so consecutive calls stay phase-continuous.

use std::io::{Seek, Write};

use crate::error::Result;
use crate::pcm::PcmWriter;

/// One full carrier cycle, 18 points. Negated sine; amplitude is applied in
/// percent of the 8-bit full scale of 125.
const FULL_WAVE: [i64; 18] = [
    0, -43, -82, -110, -125, -125, -110, -82, -43, 0, 43, 82, 110, 125, 125, 110, 82, 43,
];

/// Half oscillation used by the synchronous half-wave devices. Flat-topped
/// with a reduced level, ending on the zero crossing.
const HALF_WAVE: [i64; 9] = [96, 96, 96, 96, 96, 96, 96, 96, 0];

/// Remanence pattern a recorder leaves behind when the motor stops.
const SHUT_OFF: [i64; 18] = [
    120, 80, 40, 0, -20, -28, -32, -32, -30, -27, -23, -18, -12, -8, -5, -3, -2, -1,
];

/// Maps a wave-table value into the 32-bit sample range of [`PcmWriter`].
const TABLE_SHIFT: u32 = 24;

/// Write `periods` cycles of a tone. `amplitude` is in percent; `invert`
/// flips the polarity.
pub fn write_wave<W: Write + Seek>(
    pcm: &mut PcmWriter<W>,
    freq: u32,
    periods: u32,
    amplitude: i64,
    invert: bool,
) -> Result<()> {
    let sps = i64::from(pcm.sample_rate());
    let samples = sps / i64::from(freq);
    let total = samples * i64::from(periods);

    let mut i = 0;
    let mut ptr = 0;
    while i < total || ptr % 18 < 13 {
        let mut j = (i % sps) * i64::from(freq) * 18;
        ptr = j / sps;
        j -= ptr * sps;
        let mut w1 = FULL_WAVE[(ptr % 18) as usize] * (sps - j);
        let mut w2 = FULL_WAVE[((ptr + 1) % 18) as usize] * j;
        if invert {
            w1 = -w1;
            w2 = -w2;
        }
        let value = -amplitude * (w1 + w2) / sps / 100;
        pcm.write_sample((value as i32) << TABLE_SHIFT)?;
        i += 1;
    }
    Ok(())
}

/// Write half an oscillation of a tone. The half-wave devices alternate
/// polarity between calls via `invert`.
pub fn write_half_wave<W: Write + Seek>(
    pcm: &mut PcmWriter<W>,
    freq: u32,
    invert: bool,
) -> Result<()> {
    let sps = i64::from(pcm.sample_rate());
    let samples = sps / i64::from(freq) / 2;

    let mut i = 0;
    let mut ptr = 0;
    while i < samples || ptr % 9 < 8 {
        let mut j = i * i64::from(freq) * 9 * 2;
        ptr = j / sps;
        j -= ptr * sps;
        let mut w1 = HALF_WAVE[(ptr % 9) as usize] * (sps - j);
        let mut w2 = HALF_WAVE[((ptr + 1) % 9) as usize] * j;
        if invert {
            w1 = -w1;
            w2 = -w2;
        }
        let value = (w1 + w2) / sps;
        pcm.write_sample((value as i32) << TABLE_SHIFT)?;
        i += 1;
    }
    Ok(())
}

/// Write the shut-off pattern: one bit time (at 600 baud) of decaying
/// remanence.
pub fn write_shut_off<W: Write + Seek>(pcm: &mut PcmWriter<W>) -> Result<()> {
    let sps = i64::from(pcm.sample_rate());
    let samples = sps / 600;

    for i in 0..samples {
        let ptr = ((i * 600 * 18 + sps / 2) / sps) % 18;
        let value = -SHUT_OFF[ptr as usize];
        pcm.write_sample((value as i32) << TABLE_SHIFT)?;
    }
    Ok(())
}

/// Write `samples` samples of silence.
pub fn write_silence<W: Write + Seek>(pcm: &mut PcmWriter<W>, samples: u64) -> Result<()> {
    for _ in 0..samples {
        pcm.write_sample(0)?;
    }
    Ok(())
}
