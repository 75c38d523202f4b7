//! Accessor for multiplexed (channel-interleaved 2-D) register blocks.

use super::numeric::NumericTransferElement;
use super::{CookedAccess, NDRegisterAccessor};
use crate::access_mode::AccessMode;
use crate::backend::numeric::NumericAddressedBackend;
use crate::backend::DeviceBackend;
use crate::catalogue::numeric::NumericAddressedRegisterInfo;
use crate::codec::{codec_for_channel, ChannelCodec};
use crate::data_types::{DataValidity, UserType};
use crate::error::{Error, Result};
use crate::transfer::exception_handling::RecoverySnapshot;
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;
use std::sync::Arc;

/// Typed accessor on a multiplexed block: `buffer[channel][sample]`, with
/// sample words interleaved by channel in device memory.
///
/// The whole block is transferred on every read and write; slicing a sample
/// window only narrows the cooked view, not the raw transfer.
pub struct NumericMuxedAccessor<T: UserType> {
    core: AccessorCore,
    backend: Arc<NumericAddressedBackend>,
    info: NumericAddressedRegisterInfo,
    codecs: Vec<ChannelCodec>,

    n_samples: usize,
    sample_offset: usize,

    buffer: Vec<Vec<T>>,
    raw_words: Vec<i32>,
}

impl<T: UserType> NumericMuxedAccessor<T> {
    pub fn new(
        backend: Arc<NumericAddressedBackend>,
        info: NumericAddressedRegisterInfo,
        n_elements: usize,
        element_offset: usize,
        flags: AccessMode,
    ) -> Result<Self> {
        flags.check_for_unknown_flags(AccessMode::empty()).map_err(|_| {
            Error::logic(format!(
                "multiplexed register '{}' supports neither raw nor push mode",
                info.path
            ))
        })?;

        let n_samples = if n_elements == 0 {
            info.n_elements.saturating_sub(element_offset)
        } else {
            n_elements
        };
        if element_offset + n_samples > info.n_elements || n_samples == 0 {
            return Err(Error::logic(format!(
                "requested sample window [{element_offset}, {}) exceeds register '{}' with {} samples",
                element_offset + n_samples,
                info.path,
                info.n_elements
            )));
        }

        let codecs = info
            .channels
            .iter()
            .map(|ch| codec_for_channel(ch.encoding, ch.width, ch.n_fractional_bits, ch.signed))
            .collect::<Result<Vec<_>>>()?;

        let n_channels = info.channels.len();
        let core = AccessorCore::new(
            info.path.clone(),
            flags,
            info.access.is_readable(),
            info.access.is_writeable(),
        );

        Ok(NumericMuxedAccessor {
            core,
            backend,
            codecs,
            n_samples,
            sample_offset: element_offset,
            buffer: vec![vec![T::default(); n_samples]; n_channels],
            raw_words: vec![0; info.n_elements * n_channels],
            info,
        })
    }

    fn n_channels(&self) -> usize {
        self.info.channels.len()
    }

    fn raw_index(&self, channel: usize, sample: usize) -> usize {
        (self.sample_offset + sample) * self.n_channels() + channel
    }
}

impl<T: UserType> TransferElement for NumericMuxedAccessor<T> {
    fn core(&self) -> &AccessorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        &mut self.core
    }

    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<()> {
        if !self.backend.is_open() {
            return Err(Error::device_not_opened());
        }
        self.backend.state().check_active_exception()
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        self.backend
            .read_raw(self.info.bar, self.info.address_bytes, &mut self.raw_words)
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        self.do_read_transfer_sync()?;
        Ok(true)
    }

    fn do_post_read(&mut self, _transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        if !has_new_data {
            return Ok(());
        }
        for channel in 0..self.n_channels() {
            for sample in 0..self.n_samples {
                let word = self.raw_words[self.raw_index(channel, sample)];
                self.buffer[channel][sample] = self.codecs[channel].to_cooked(word);
            }
        }
        self.core.version = VersionNumber::new();
        self.core.validity = DataValidity::Ok;
        Ok(())
    }

    fn do_pre_write(&mut self, _transfer_type: TransferType, _version: VersionNumber) -> Result<()> {
        if !self.backend.is_open() {
            return Err(Error::device_not_opened());
        }
        self.backend.state().check_active_exception()?;
        for channel in 0..self.n_channels() {
            for sample in 0..self.n_samples {
                let word = self.codecs[channel].to_raw(&self.buffer[channel][sample]);
                let index = self.raw_index(channel, sample);
                self.raw_words[index] = word;
            }
        }
        Ok(())
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool> {
        self.backend
            .write_raw(self.info.bar, self.info.address_bytes, &self.raw_words)?;
        Ok(false)
    }

    fn do_post_write(&mut self, _transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.core.version = version;
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for NumericMuxedAccessor<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }

    fn cooked_access(&mut self) -> Option<&mut dyn CookedAccess> {
        None
    }
}

impl<T: UserType> NumericTransferElement<T> for NumericMuxedAccessor<T> {
    fn recovery_snapshot(&self) -> Option<RecoverySnapshot> {
        if !self.core.writeable {
            return None;
        }
        Some(RecoverySnapshot {
            bar: self.info.bar,
            address_bytes: self.info.address_bytes,
            words: self.raw_words.clone(),
        })
    }
}
