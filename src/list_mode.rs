//! Decoding of the list-mode event stream.

use crate::byte_order::{decode_words, ByteOrder};
use crate::error::{Result, ValidationError};
use crate::protocol;
use crate::transport::Transport;

/// Low 31 bits of a timestamp word.
pub const TIMESTAMP_MASK: u32 = 0x7fff_ffff;
pub const AMPLITUDE_MASK: u32 = 0x7fe0_0000;
pub const AMPLITUDE_SHIFT: u32 = 21;
pub const TIME_MASK: u32 = 0x001f_ffff;
/// Time fields above this value have wrapped past the last timestamp word.
pub const ROLLOVER: u32 = 1_048_575;
/// Pulses requested per read by default.
pub const DEFAULT_PULSES: usize = 2048;

/// One detected pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub amplitude: u16,
    /// Microseconds, `None` until the first timestamp word arrives.
    pub time: Option<u32>,
}

/// What a single list-mode word means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    End,
    Timestamp(u32),
    Pulse { amplitude: u16, offset: u32 },
}

impl Word {
    pub fn classify(w: u32) -> Self {
        if w == 0 {
            Word::End
        } else if w & !TIMESTAMP_MASK != 0 {
            Word::Timestamp(w & TIMESTAMP_MASK)
        } else {
            Word::Pulse {
                amplitude: ((w & AMPLITUDE_MASK) >> AMPLITUDE_SHIFT) as u16,
                offset: w & TIME_MASK,
            }
        }
    }
}

/// Keeps the timer base across reads of one list-mode run.
#[derive(Debug, Clone, Default)]
pub struct ListModeDecoder {
    timer_base: Option<u32>,
}

impl ListModeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer_base(&self) -> Option<u32> {
        self.timer_base
    }

    /// Forgets the timer base, for a new run.
    pub fn reset(&mut self) {
        self.timer_base = None;
    }

    /// Decodes `words` up to the first zero word and returns the number of
    /// pulses seen. Pulses are appended to `out` when one is given.
    pub fn decode(&mut self, words: &[u32], mut out: Option<&mut Vec<Pulse>>) -> usize {
        let mut pulses = 0;
        for &w in words {
            match Word::classify(w) {
                Word::End => break,
                Word::Timestamp(base) => self.timer_base = Some(base),
                Word::Pulse { amplitude, offset } => {
                    pulses += 1;
                    if let Some(out) = out.as_deref_mut() {
                        out.push(Pulse {
                            amplitude,
                            time: self.absolute_time(offset),
                        });
                    }
                }
            }
        }
        pulses
    }

    fn absolute_time(&self, offset: u32) -> Option<u32> {
        let offset = if offset > ROLLOVER {
            offset - ROLLOVER
        } else {
            offset
        };
        self.timer_base.map(|base| base.wrapping_add(offset))
    }

    /// Reads one buffer of at most `max_pulses` words from the device.
    pub fn read<T: Transport + ?Sized>(
        &mut self,
        t: &mut T,
        host: ByteOrder,
        max_pulses: usize,
        out: Option<&mut Vec<Pulse>>,
    ) -> Result<usize> {
        if max_pulses == 0 {
            return Err(ValidationError::PulseCount(max_pulses).into());
        }
        let bytes = protocol::request_spectrum(t, max_pulses * 4)?;
        let words = decode_words(&bytes, host);
        Ok(self.decode(&words, out))
    }
}
