//! Request/confirmation pairs shared by the handshake and the session.

use log::debug;

use crate::byte_order::ByteOrder;
use crate::error::{DriverError, ProtocolError, Result, TransportError};
use crate::status::{StatusRecord, CHANNELS, STATUS_LEN};
use crate::templates::{CLEAR_SPECTRUM, SPECTRUM_REQUEST, STATUS_REQUEST};
use crate::transport::{Pipe, Transport, READ_TIMEOUT, WRITE_TIMEOUT};

/// Longest answer the init pipe gives.
const INIT_RESPONSE_LEN: usize = 6;

/// How the data pipe acknowledged a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    /// Nothing came back within the read timeout.
    Empty,
    /// Two byte acknowledgement.
    Ack,
}

/// Writes all of `bytes` or fails.
pub fn send<T: Transport + ?Sized>(
    t: &mut T,
    pipe: Pipe,
    bytes: &[u8],
    step: &'static str,
) -> Result<()> {
    let written = t.write(pipe, bytes, WRITE_TIMEOUT)?;
    if written != bytes.len() {
        return Err(ProtocolError::ShortWrite {
            step,
            written,
            expected: bytes.len(),
        }
        .into());
    }
    Ok(())
}

/// Reads the init pipe's answer code.
pub fn init_response<T: Transport + ?Sized>(t: &mut T, step: &'static str) -> Result<u8> {
    let resp = t.read(Pipe::Init, INIT_RESPONSE_LEN, READ_TIMEOUT)?;
    debug!("{step}: init response {resp:02x?}");
    match resp.as_slice() {
        [code @ (0 | 4), _] => Ok(*code),
        [_, _, _, _, _, code] => Ok(*code),
        _ => Err(ProtocolError::UnexpectedResponse {
            step,
            response: resp,
        }
        .into()),
    }
}

/// Reads the init pipe and insists on `expected`.
pub fn expect_init<T: Transport + ?Sized>(
    t: &mut T,
    expected: u8,
    step: &'static str,
) -> Result<()> {
    let got = init_response(t, step)?;
    if got != expected {
        return Err(ProtocolError::UnexpectedCode {
            step,
            expected,
            got,
        }
        .into());
    }
    Ok(())
}

/// Waits for the data pipe to acknowledge the previous write.
pub fn data_ready<T: Transport + ?Sized>(t: &mut T, step: &'static str) -> Result<Ready> {
    match t.read(Pipe::Data, STATUS_LEN, READ_TIMEOUT) {
        Ok(resp) if resp.is_empty() => Ok(Ready::Empty),
        Ok(resp) if resp.len() == 2 => Ok(Ready::Ack),
        Ok(resp) => Err(ProtocolError::UnexpectedResponse {
            step,
            response: resp,
        }
        .into()),
        // the device acknowledges most writes by staying silent
        Err(TransportError::Timeout) => Ok(Ready::Empty),
        Err(e) => Err(e.into()),
    }
}

/// Like [`data_ready`] but only silence is accepted.
pub fn expect_empty<T: Transport + ?Sized>(t: &mut T, step: &'static str) -> Result<()> {
    match data_ready(t, step)? {
        Ready::Empty => Ok(()),
        Ready::Ack => Err(ProtocolError::UnexpectedCode {
            step,
            expected: 0,
            got: 1,
        }
        .into()),
    }
}

/// Pushes a status record and waits for either kind of acknowledgement.
pub fn write_status<T: Transport + ?Sized>(
    t: &mut T,
    record: &StatusRecord,
    host: ByteOrder,
) -> Result<Ready> {
    send(t, Pipe::Data, &record.encode_frame(host), "status write")?;
    data_ready(t, "status write")
}

/// Asks for the status record. Implausible records come back as
/// [`DriverError::Sanity`].
pub fn read_status<T: Transport + ?Sized>(t: &mut T, host: ByteOrder) -> Result<StatusRecord> {
    send(t, Pipe::Data, &[STATUS_REQUEST], "status request")?;
    let resp = t.read(Pipe::Data, STATUS_LEN, READ_TIMEOUT)?;
    let record = StatusRecord::decode(&resp, host)?;
    record.check_sanity()?;
    Ok(record)
}

/// Zeroes the device's histogram.
pub fn clear_spectrum<T: Transport + ?Sized>(t: &mut T) -> Result<Ready> {
    let mut frame = vec![0u8; CHANNELS * 4 + 1];
    frame[0] = CLEAR_SPECTRUM;
    send(t, Pipe::Data, &frame, "clear spectrum")?;
    data_ready(t, "clear spectrum")
}

/// Sends the spectrum request and returns whatever the device answered with.
pub fn request_spectrum<T: Transport + ?Sized>(t: &mut T, max_len: usize) -> Result<Vec<u8>> {
    send(t, Pipe::Data, &[SPECTRUM_REQUEST], "spectrum request")?;
    Ok(t.read(Pipe::Data, max_len, READ_TIMEOUT)?)
}

/// Whether a failed status read may simply be repeated.
pub fn is_transient(err: &DriverError) -> bool {
    matches!(
        err,
        DriverError::Sanity(_) | DriverError::Transport(TransportError::Timeout)
    )
}
