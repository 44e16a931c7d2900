//! Kansas City Standard tape codec for 1980s pocket computers.
//!
//! A software modem over uncompressed wave files: the write side synthesizes
//! frequency-shift-keyed tone the way the original tape interfaces did, the
//! read side recovers bits from decades-old recordings through threshold
//! classification, wave-length measurement and a hunting/synchronizing/
//! synchronized state machine with jitter tolerance.
//!
//! Channels are opened with the device parameters (baud rate, data bits,
//! parity, stop bits); the baud rate selects the device family's carrier
//! and wave-shape variant. See [`KcsReader`] and [`KcsWriter`].

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod pcm;
pub mod synth;

pub use config::{ChannelConfig, DeviceVariant, Parity, Tuning};
pub use decoder::{
    BitRead, ByteRead, DecodedByte, KcsReader, RawRead, SyncState, FRAMING_FLAG, PARITY_FLAG,
};
pub use encoder::KcsWriter;
pub use error::{Result, TapeError};
pub use pcm::{PcmReader, PcmWriter};
