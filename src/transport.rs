use std::time::Duration;

use log::{debug, warn};
use rusb::{Context, DeviceHandle};

use crate::error::TransportError;

/// Read timeout used in steady operation.
pub const READ_TIMEOUT: Duration = Duration::from_millis(125);
/// Timeout for writes, including firmware segments.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Reads always offer the device at least this much room.
pub const SCRATCH_LEN: usize = 2 * 1024 * 4;

/// The two bulk endpoint pairs of the digiBASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipe {
    /// Used only while the handshake runs.
    Init,
    /// Status, spectrum and list-mode traffic.
    Data,
}

impl Pipe {
    pub const fn in_address(self) -> u8 {
        match self {
            Pipe::Init => 0x81,
            Pipe::Data => 0x82,
        }
    }

    pub const fn out_address(self) -> u8 {
        match self {
            Pipe::Init => 0x01,
            Pipe::Data => 0x08,
        }
    }
}

/// Bounded bulk transfers. Implementations must not retry.
pub trait Transport {
    fn write(&mut self, pipe: Pipe, bytes: &[u8], timeout: Duration)
        -> Result<usize, TransportError>;

    /// Reads one transfer into `buf`, returning how many bytes arrived.
    fn read_into(
        &mut self,
        pipe: Pipe,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Reads at most `max_len` bytes. The transfer itself is given an
    /// oversized buffer and a longer answer is rejected, not truncated.
    fn read(
        &mut self,
        pipe: Pipe,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut scratch = vec![0u8; max_len.max(SCRATCH_LEN)];
        let received = self.read_into(pipe, &mut scratch, timeout)?;
        if received > max_len {
            return Err(TransportError::Overflow {
                received,
                capacity: max_len,
            });
        }
        scratch.truncate(received);
        Ok(scratch)
    }

    /// Gives the device back to the system.
    fn release(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(
        &mut self,
        pipe: Pipe,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).write(pipe, bytes, timeout)
    }

    fn read_into(
        &mut self,
        pipe: Pipe,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).read_into(pipe, buf, timeout)
    }

    fn release(&mut self) -> Result<(), TransportError> {
        (**self).release()
    }
}

/// A claimed digiBASE on the USB bus.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
}

impl UsbTransport {
    /// Selects configuration 1, claims interface 0 and clears any halt left on
    /// the init endpoints by a previous session.
    pub fn claim(mut handle: DeviceHandle<Context>) -> Result<Self, TransportError> {
        handle.set_active_configuration(1)?;
        handle.claim_interface(0)?;
        handle.set_alternate_setting(0, 0)?;
        for ep in [Pipe::Init.in_address(), Pipe::Init.out_address()] {
            if let Err(e) = handle.clear_halt(ep) {
                warn!("Could not clear halt on endpoint 0x{ep:02x}: {e}");
            }
        }
        Ok(Self { handle })
    }
}

impl Transport for UsbTransport {
    fn write(
        &mut self,
        pipe: Pipe,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let written = self
            .handle
            .write_bulk(pipe.out_address(), bytes, timeout)?;
        debug!("{pipe:?} <- {written}/{} bytes", bytes.len());
        Ok(written)
    }

    fn read_into(
        &mut self,
        pipe: Pipe,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let read = self.handle.read_bulk(pipe.in_address(), buf, timeout)?;
        debug!("{pipe:?} -> {read} bytes");
        Ok(read)
    }

    fn release(&mut self) -> Result<(), TransportError> {
        self.handle.release_interface(0)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug)]
    pub(crate) enum Step {
        Write(Pipe, Vec<u8>),
        Read(Pipe, Result<Vec<u8>, TransportError>),
    }

    /// Replays a fixed conversation and fails the test on any deviation.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        steps: VecDeque<Step>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn expect_write(mut self, pipe: Pipe, bytes: impl Into<Vec<u8>>) -> Self {
            self.steps.push_back(Step::Write(pipe, bytes.into()));
            self
        }

        pub(crate) fn respond(mut self, pipe: Pipe, bytes: impl Into<Vec<u8>>) -> Self {
            self.steps.push_back(Step::Read(pipe, Ok(bytes.into())));
            self
        }

        pub(crate) fn fail_read(mut self, pipe: Pipe, err: TransportError) -> Self {
            self.steps.push_back(Step::Read(pipe, Err(err)));
            self
        }

        pub(crate) fn remaining(&self) -> usize {
            self.steps.len()
        }
    }

    impl Transport for ScriptedTransport {
        fn write(
            &mut self,
            pipe: Pipe,
            bytes: &[u8],
            _timeout: Duration,
        ) -> Result<usize, TransportError> {
            match self.steps.pop_front() {
                Some(Step::Write(p, expected)) => {
                    assert_eq!((p, expected.as_slice()), (pipe, bytes));
                    Ok(bytes.len())
                }
                other => panic!("unexpected write on {pipe:?} {bytes:02x?}, script had {other:?}"),
            }
        }

        fn read_into(
            &mut self,
            pipe: Pipe,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize, TransportError> {
            match self.steps.pop_front() {
                Some(Step::Read(p, response)) => {
                    assert_eq!(p, pipe);
                    let response = response?;
                    buf[..response.len()].copy_from_slice(&response);
                    Ok(response.len())
                }
                other => panic!("unexpected read on {pipe:?}, script had {other:?}"),
            }
        }
    }

    #[test]
    fn oversized_answer_is_rejected() {
        let mut t = ScriptedTransport::new().respond(Pipe::Data, vec![0; 10]);
        assert_eq!(
            Err(TransportError::Overflow {
                received: 10,
                capacity: 6
            }),
            t.read(Pipe::Data, 6, READ_TIMEOUT)
        );
    }

    #[test]
    fn short_answer_is_truncated() {
        let mut t = ScriptedTransport::new().respond(Pipe::Init, vec![4, 0x80]);
        assert_eq!(Ok(vec![4, 0x80]), t.read(Pipe::Init, 6, READ_TIMEOUT));
        assert_eq!(0, t.remaining());
    }

    #[test]
    fn endpoint_addresses() {
        assert_eq!((0x81, 0x01), (Pipe::Init.in_address(), Pipe::Init.out_address()));
        assert_eq!((0x82, 0x08), (Pipe::Data.in_address(), Pipe::Data.out_address()));
    }
}
