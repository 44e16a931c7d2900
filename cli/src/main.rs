use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::debug;

use kcstape_core::{BitRead, ByteRead, KcsReader, KcsWriter, Parity, RawRead, SyncState};

/// Sentinel word written for lead-in frames in the word output format.
const LEAD_IN_WORD: u16 = 0x7fff;

#[derive(Parser)]
#[command(name = "kcstape")]
#[command(about = "Convert between pocket computer tape images and binary data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct LineArgs {
    /// Baud rate: 300, 600, 1200, 2400, 500 (Sharp), 1500 (Sharp graphing)
    /// or 1400 (TI); a negative value selects inverted phase
    #[arg(long, default_value_t = 300, allow_negative_numbers = true)]
    baud: i32,

    /// Data bits per word (4, 7 or 8)
    #[arg(long, default_value_t = 8)]
    bits: u8,

    /// Parity: E, O or N
    #[arg(long, default_value = "E", value_parser = parse_parity)]
    parity: Parity,

    /// Stop bits, 0 to 4 (0 selects synchronous framing)
    #[arg(long, default_value_t = 2)]
    stop_bits: u8,
}

#[derive(ValueEnum, Clone, Copy, PartialEq)]
enum Format {
    /// 16-bit words with framing information and the lead-in sentinel
    Words,
    /// decoded data bytes only
    Bytes,
    /// ASCII-armored raw frames
    Ascii,
    /// raw frame bits in 16-bit words
    Raw,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a tape image to binary data
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output binary file
        #[arg(value_name = "OUTPUT.BIN")]
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Words)]
        format: Format,

        /// Keep bytes with parity or framing errors in the bytes format
        #[arg(long)]
        ignore_errors: bool,

        #[command(flatten)]
        line: LineArgs,
    },

    /// Encode binary data into a tape image
    Encode {
        /// Input binary file
        #[arg(value_name = "INPUT.BIN")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// First lead-in length in tenths of a second
        #[arg(long, default_value_t = 30)]
        first_lead_in: u32,

        /// Lead-in length between blocks in tenths of a second
        #[arg(long, default_value_t = 20)]
        lead_in: u32,

        /// Bytes per block; 0 writes everything after a single lead-in
        #[arg(long, default_value_t = 0)]
        block_size: usize,

        #[command(flatten)]
        line: LineArgs,
    },

    /// Copy a tape image bit for bit, re-synthesizing the audio
    Copy {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Baud rate for both sides
        #[arg(long, default_value_t = 300, allow_negative_numbers = true)]
        baud: i32,

        /// Override the input baud rate
        #[arg(long, allow_negative_numbers = true)]
        in_baud: Option<i32>,

        /// Override the output baud rate
        #[arg(long, allow_negative_numbers = true)]
        out_baud: Option<i32>,

        /// Carry silent gaps of the recording into the copy
        #[arg(long)]
        preserve_silence: bool,
    },
}

fn parse_parity(value: &str) -> Result<Parity, String> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Parity::from_char(c).map_err(|e| e.to_string()),
        _ => Err("parity must be a single character: E, O or N".into()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            ignore_errors,
            line,
        } => decode_command(&input, &output, format, ignore_errors, &line),
        Commands::Encode {
            input,
            output,
            first_lead_in,
            lead_in,
            block_size,
            line,
        } => encode_command(&input, &output, first_lead_in, lead_in, block_size, &line),
        Commands::Copy {
            input,
            output,
            baud,
            in_baud,
            out_baud,
            preserve_silence,
        } => copy_command(
            &input,
            &output,
            in_baud.unwrap_or(baud),
            out_baud.unwrap_or(baud),
            preserve_silence,
        ),
    }
}

fn decode_command(
    input: &PathBuf,
    output: &PathBuf,
    format: Format,
    ignore_errors: bool,
    line: &LineArgs,
) -> Result<(), Box<dyn Error>> {
    let mut reader = KcsReader::open(input, line.baud, line.bits, line.parity, line.stop_bits)?;
    let mut out = BufWriter::new(File::create(output)?);

    let mut blocks = 0u64;
    let mut chars = 0u64;
    let mut parity_errors = 0u64;
    let mut framing_errors = 0u64;
    let mut in_lead_in = false;
    let mut written = 0u64;

    loop {
        match format {
            Format::Words | Format::Bytes => match reader.read_byte()? {
                ByteRead::LeadIn => {
                    if !in_lead_in {
                        blocks += 1;
                    }
                    in_lead_in = true;
                    if format == Format::Words {
                        out.write_all(&LEAD_IN_WORD.to_le_bytes())?;
                        written += 2;
                    }
                }
                ByteRead::Byte(byte) => {
                    in_lead_in = false;
                    if byte.parity_error {
                        parity_errors += 1;
                        debug!(
                            "parity error at {} ms, offset {:#08x}",
                            reader.position_millis(),
                            written
                        );
                    }
                    if byte.framing_error {
                        framing_errors += 1;
                        debug!(
                            "framing error at {} ms, offset {:#08x}",
                            reader.position_millis(),
                            written
                        );
                    }
                    if format == Format::Words {
                        chars += 1;
                        out.write_all(&byte.word().to_le_bytes())?;
                        written += 2;
                    } else if ignore_errors || (!byte.parity_error && !byte.framing_error) {
                        chars += 1;
                        out.write_all(&[byte.value()])?;
                        written += 1;
                    }
                }
                ByteRead::BadData => {
                    eprintln!(
                        "unrecognized wave pattern at {} ms",
                        reader.position_millis()
                    );
                    break;
                }
                ByteRead::EndOfTape => break,
            },
            Format::Ascii | Format::Raw => {
                let outcome = if format == Format::Ascii {
                    reader.read_ascii()?
                } else {
                    reader.read_raw()?
                };
                match outcome {
                    RawRead::Word(word) => {
                        // no lead-in sentinel in the raw formats; account
                        // blocks by the polarity of the first frame bit
                        if word & 1 == 1 {
                            if !in_lead_in {
                                blocks += 1;
                            }
                            in_lead_in = true;
                        } else {
                            in_lead_in = false;
                            chars += 1;
                        }
                        out.write_all(&word.to_le_bytes())?;
                        written += 2;
                        if format == Format::Ascii && written % 64 == 0 {
                            out.write_all(b"\n")?;
                        }
                    }
                    RawRead::BadData => {
                        eprintln!(
                            "unrecognized wave pattern at {} ms",
                            reader.position_millis()
                        );
                        break;
                    }
                    RawRead::EndOfTape => break,
                }
            }
        }
    }

    match format {
        Format::Words | Format::Bytes => println!(
            "blocks: {}, chars: {}, parity errors: {}, framing errors: {}",
            blocks, chars, parity_errors, framing_errors
        ),
        _ => println!("blocks: {}, chars: {}", blocks, chars),
    }
    Ok(())
}

fn encode_command(
    input: &PathBuf,
    output: &PathBuf,
    first_lead_in: u32,
    lead_in: u32,
    block_size: usize,
    line: &LineArgs,
) -> Result<(), Box<dyn Error>> {
    let data = std::fs::read(input)?;
    println!("read {} bytes from {}", data.len(), input.display());

    let mut writer = KcsWriter::create(output, line.baud, line.bits, line.parity, line.stop_bits)?;

    writer.write_lead_in(first_lead_in)?;
    if block_size == 0 {
        for &byte in &data {
            writer.write_byte(byte)?;
        }
    } else {
        for (index, block) in data.chunks(block_size).enumerate() {
            if index > 0 {
                writer.write_lead_in(lead_in)?;
            }
            for &byte in block {
                writer.write_byte(byte)?;
            }
        }
    }

    let millis = writer.position_millis();
    writer.finish()?;
    println!(
        "wrote {} ({} bytes, {}.{} s of tape)",
        output.display(),
        data.len(),
        millis / 1000,
        (millis % 1000) / 100
    );
    Ok(())
}

fn copy_command(
    input: &PathBuf,
    output: &PathBuf,
    in_baud: i32,
    out_baud: i32,
    preserve_silence: bool,
) -> Result<(), Box<dyn Error>> {
    let mut reader = KcsReader::open(input, in_baud, 8, Parity::None, 1)?;
    let mut writer = KcsWriter::create(output, out_baud, 8, Parity::None, 1)?;
    // the source recording supplies its own lead-out
    writer.set_raw(true);

    let mut count = 0u64;
    let mut bad = 0u64;

    loop {
        let before = reader.position();
        let bit = reader.read_bit()?;
        let gap = reader.position() - before;

        if preserve_silence
            && reader.sync_state() != SyncState::Synchronized
            && gap >= 2 * reader.bit_length() as u64
        {
            let silence = if reader.sample_rate() == writer.sample_rate() {
                gap
            } else {
                (gap as f64 * f64::from(writer.sample_rate()) / f64::from(reader.sample_rate()))
                    as u64
            };
            writer.write_silence(silence)?;
        }

        match bit {
            BitRead::Bit(b) => {
                writer.write_bit(b)?;
                count += 1;
            }
            BitRead::BadData => {
                debug!("bad bit at {} ms", reader.position_millis());
                bad += 1;
            }
            BitRead::EndOfTape => break,
        }
    }

    writer.finish()?;
    println!("bits: {}, bad: {}", count, bad);
    Ok(())
}
