//! Cumulative and differential spectra kept by a session.

use log::debug;

use crate::byte_order::{decode_counts, ByteOrder};
use crate::error::{ProtocolError, Result, ValidationError};
use crate::protocol;
use crate::status::{CHANNELS, CHANNEL_FIELD};
use crate::transport::Transport;

/// Bytes in one spectrum transfer.
pub const SPECTRUM_BYTES: usize = CHANNELS * 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spectra {
    cumulative: Box<[i32; CHANNELS]>,
    differential: Box<[i32; CHANNELS]>,
}

impl Default for Spectra {
    fn default() -> Self {
        Self {
            cumulative: Box::new([0; CHANNELS]),
            differential: Box::new([0; CHANNELS]),
        }
    }
}

impl Spectra {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts per channel since the last clear.
    pub fn cumulative(&self) -> &[i32; CHANNELS] {
        &self.cumulative
    }

    /// Change per channel since the previous read.
    pub fn differential(&self) -> &[i32; CHANNELS] {
        &self.differential
    }

    /// True when no channel holds any counts, which is what the device
    /// returns right after a clear.
    pub fn is_cleared(&self) -> bool {
        self.cumulative.iter().all(|&c| c == 0)
    }

    /// Stores a fresh read. The first read after a clear yields an all-zero
    /// differential.
    pub fn update(&mut self, counts: &[i32; CHANNELS]) {
        if self.is_cleared() {
            self.differential.fill(0);
        } else {
            for ((d, &new), &old) in self
                .differential
                .iter_mut()
                .zip(counts.iter())
                .zip(self.cumulative.iter())
            {
                *d = new.wrapping_sub(old);
            }
        }
        self.cumulative.copy_from_slice(counts);
    }

    /// Sum of the cumulative counts in channels `low..high`.
    pub fn roi_sum(&self, low: usize, high: usize) -> Result<i64, ValidationError> {
        if low > high || high > CHANNEL_FIELD as usize {
            return Err(ValidationError::Region { low, high });
        }
        Ok(self.cumulative[low..high].iter().map(|&c| c as i64).sum())
    }

    pub fn total_counts(&self) -> i64 {
        self.cumulative.iter().map(|&c| c as i64).sum()
    }

    /// Requests one spectrum and updates both arrays. A short transfer
    /// leaves them untouched.
    pub fn acquire<T: Transport + ?Sized>(&mut self, t: &mut T, host: ByteOrder) -> Result<()> {
        let counts = read_counts(t, host)?;
        self.update(&counts);
        Ok(())
    }
}

/// One spectrum transfer, decoded to host order.
pub fn read_counts<T: Transport + ?Sized>(
    t: &mut T,
    host: ByteOrder,
) -> Result<Box<[i32; CHANNELS]>> {
    let bytes = protocol::request_spectrum(t, SPECTRUM_BYTES)?;
    if bytes.len() != SPECTRUM_BYTES {
        return Err(ProtocolError::ShortSpectrum {
            received: bytes.len(),
            expected: SPECTRUM_BYTES,
        }
        .into());
    }
    let mut counts = Box::new([0; CHANNELS]);
    counts.copy_from_slice(&decode_counts(&bytes, host));
    debug!("Spectrum read, {} counts", counts.iter().map(|&c| c as i64).sum::<i64>());
    Ok(counts)
}
