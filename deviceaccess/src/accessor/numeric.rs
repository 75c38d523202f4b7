//! Accessor for flat regions of a numeric-addressed backend.

use super::{CookedAccess, NDRegisterAccessor};
use crate::access_mode::AccessMode;
use crate::backend::numeric::NumericAddressedBackend;
use crate::backend::DeviceBackend;
use crate::catalogue::numeric::NumericAddressedRegisterInfo;
use crate::codec::{codec_for_channel, ChannelCodec};
use crate::data_types::{DataType, DataValidity, UserType};
use crate::error::{Error, Result};
use crate::transfer::exception_handling::RecoverySnapshot;
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;
use std::sync::Arc;

/// Accessor chain element sitting directly on a `RawMemoryPort`; provides
/// the snapshot replayed by the recovery machinery.
pub trait NumericTransferElement<T: UserType>: NDRegisterAccessor<T> {
    /// Raw words as staged by the last `do_pre_write`, if write-capable.
    fn recovery_snapshot(&self) -> Option<RecoverySnapshot>;
}

/// Typed accessor on a flat (1-D) register window.
pub struct NumericAccessor<T: UserType> {
    core: AccessorCore,
    backend: Arc<NumericAddressedBackend>,
    info: NumericAddressedRegisterInfo,
    codec: ChannelCodec,
    raw_mode: bool,

    n_elements: usize,
    /// First byte of the accessed window inside the BAR.
    start_byte: u64,
    /// Alignment-expanded transfer span.
    span_start_byte: u64,

    buffer: Vec<Vec<T>>,
    raw_words: Vec<i32>,
    /// Writes must be whole aligned words; reads tolerate packed elements.
    misaligned_write: bool,
}

impl<T: UserType> NumericAccessor<T> {
    pub fn new(
        backend: Arc<NumericAddressedBackend>,
        info: NumericAddressedRegisterInfo,
        n_elements: usize,
        element_offset: usize,
        flags: AccessMode,
    ) -> Result<Self> {
        flags.check_for_unknown_flags(AccessMode::RAW)?;
        let raw_mode = flags.contains(AccessMode::RAW);
        if raw_mode && T::DATA_TYPE != DataType::Int32 {
            return Err(Error::logic(format!(
                "raw access on register '{}' requires an int32 accessor, got {}",
                info.path,
                T::DATA_TYPE
            )));
        }

        let n_elements = if n_elements == 0 {
            info.n_elements.saturating_sub(element_offset)
        } else {
            n_elements
        };
        if element_offset + n_elements > info.n_elements || n_elements == 0 {
            return Err(Error::logic(format!(
                "requested window [{element_offset}, {}) exceeds register '{}' with {} elements",
                element_offset + n_elements,
                info.path,
                info.n_elements
            )));
        }

        let element_bytes = (info.element_pitch_bits / 8) as u64;
        let start_byte = info.address_bytes + element_offset as u64 * element_bytes;
        let end_byte = start_byte + n_elements as u64 * element_bytes;
        let alignment = backend.minimum_transfer_alignment(info.bar) as u64;
        let span_start_byte = start_byte - start_byte % alignment;
        let span_end_byte = end_byte.div_ceil(alignment) * alignment;
        let span_words = ((span_end_byte - span_start_byte) / 4) as usize;

        let misaligned_write = info.element_pitch_bits != 32
            || start_byte % alignment != 0
            || (end_byte - start_byte) % alignment != 0;

        let channel = info.channels[0];
        let codec = codec_for_channel(
            channel.encoding,
            channel.width,
            channel.n_fractional_bits,
            channel.signed,
        )?;

        let core = AccessorCore::new(
            info.path.clone(),
            flags,
            info.access.is_readable(),
            info.access.is_writeable(),
        );

        Ok(NumericAccessor {
            core,
            backend,
            codec,
            raw_mode,
            n_elements,
            start_byte,
            span_start_byte,
            buffer: vec![vec![T::default(); n_elements]],
            raw_words: vec![0; span_words],
            misaligned_write,
            info,
        })
    }

    fn raw_byte(&self, index: usize) -> u8 {
        (self.raw_words[index / 4] >> (8 * (index % 4))) as u8
    }

    /// Raw word of one element, assembled little-endian from the span.
    fn element_word(&self, sample: usize) -> i32 {
        let element_bytes = (self.info.element_pitch_bits / 8) as usize;
        let base = (self.start_byte - self.span_start_byte) as usize + sample * element_bytes;
        let mut word: u32 = 0;
        for i in 0..element_bytes.min(4) {
            word |= (self.raw_byte(base + i) as u32) << (8 * i);
        }
        word as i32
    }

    fn set_element_word(&mut self, sample: usize, word: i32) {
        // only reachable with a word-aligned 32-bit pitch
        let index = (self.start_byte - self.span_start_byte) as usize / 4 + sample;
        self.raw_words[index] = word;
    }

    fn encode_buffer(&mut self) {
        for sample in 0..self.n_elements {
            let word = if self.raw_mode {
                self.buffer[0][sample].to_f64() as i64 as i32
            } else {
                self.codec.to_raw(&self.buffer[0][sample])
            };
            self.set_element_word(sample, word);
        }
    }

    fn decode_buffer(&mut self) {
        for sample in 0..self.n_elements {
            let word = self.element_word(sample);
            self.buffer[0][sample] = if self.raw_mode {
                T::from_f64(word as f64)
            } else {
                self.codec.to_cooked(word)
            };
        }
    }

    fn check_device_usable(&self) -> Result<()> {
        if !self.backend.is_open() {
            return Err(Error::device_not_opened());
        }
        self.backend.state().check_active_exception()
    }
}

impl<T: UserType> TransferElement for NumericAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
    }

    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<()> {
        self.check_device_usable()
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        self.backend
            .read_raw(self.info.bar, self.span_start_byte, &mut self.raw_words)
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        self.do_read_transfer_sync()?;
        Ok(true)
    }

    fn do_post_read(&mut self, _transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        if !has_new_data {
            return Ok(());
        }
        self.decode_buffer();
        self.core.version = VersionNumber::new();
        self.core.validity = DataValidity::Ok;
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        self.check_device_usable()?;
        if self.misaligned_write {
            return Err(Error::logic(format!(
                "register '{}' cannot be written: window is not word aligned",
                self.info.path
            )));
        }
        self.encode_buffer();
        Ok(())
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool> {
        self.backend
            .write_raw(self.info.bar, self.span_start_byte, &self.raw_words)?;
        Ok(false)
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.core.version = version;
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for NumericAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }

    fn cooked_access(&mut self) -> Option<&mut dyn CookedAccess> {
        if self.raw_mode {
            Some(self)
        } else {
            None
        }
    }
}

impl<T: UserType> NumericTransferElement<T> for NumericAccessor<T> {
    fn recovery_snapshot(&self) -> Option<RecoverySnapshot> {
        if !self.core.writeable {
            return None;
        }
        Some(RecoverySnapshot {
            bar: self.info.bar,
            address_bytes: self.span_start_byte,
            words: self.raw_words.clone(),
        })
    }
}

impl<T: UserType> CookedAccess for NumericAccessor<T> {
    fn get_cooked_f64(&self, channel: usize, sample: usize) -> Result<f64> {
        check_element(channel, sample, 1, self.n_elements)?;
        let word = self.buffer[0][sample].to_f64() as i64 as i32;
        Ok(self.codec.to_cooked_f64(word))
    }

    fn set_cooked_f64(&mut self, channel: usize, sample: usize, value: f64) -> Result<()> {
        check_element(channel, sample, 1, self.n_elements)?;
        let word = self.codec.to_raw_f64(value);
        self.buffer[0][sample] = T::from_f64(word as f64);
        Ok(())
    }
}

pub(crate) fn check_element(
    channel: usize,
    sample: usize,
    n_channels: usize,
    n_samples: usize,
) -> Result<()> {
    if channel >= n_channels || sample >= n_samples {
        return Err(Error::logic(format!(
            "element [{channel}][{sample}] is outside the accessor buffer ({n_channels} x {n_samples})"
        )));
    }
    Ok(())
}
