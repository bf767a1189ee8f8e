//! Modbus-TCP framing.
//!
//! A frame is the 7-byte MBAP header followed by the PDU:
//!
//! ```text
//! [transaction_id:2][protocol_id:2][length:2][unit_id:1][function_code:1][data...]
//! ```
//!
//! All fields are big-endian. `length` counts the unit id and the PDU.

use crate::protocol::{self as proto, Exception};

/// Size of the MBAP header in bytes.
pub const MBAP_HEADER_LEN: usize = 7;
/// Largest Modbus-TCP application data unit.
pub const MAX_ADU_LEN: usize = 260;
/// Range accepted for the MBAP length field.
pub const MBAP_LENGTH_RANGE: std::ops::RangeInclusive<u16> =
    2..=(MAX_ADU_LEN - MBAP_HEADER_LEN + 1) as u16;

/// Frames that cannot be answered at all, not even with an exception.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("MBAP length {0} is outside of 2..=254")]
    InvalidLength(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = bytes.get(..MBAP_HEADER_LEN).ok_or(DecodeError::Truncated {
            expected: MBAP_HEADER_LEN,
            actual: bytes.len(),
        })?;
        let header = Self {
            transaction_id: u16::from_be_bytes([header[0], header[1]]),
            protocol_id: u16::from_be_bytes([header[2], header[3]]),
            length: u16::from_be_bytes([header[4], header[5]]),
            unit_id: header[6],
        };
        if !MBAP_LENGTH_RANGE.contains(&header.length) {
            return Err(DecodeError::InvalidLength(header.length));
        }
        Ok(header)
    }

    /// Total frame size announced by this header.
    pub fn frame_len(&self) -> usize {
        MBAP_HEADER_LEN - 1 + usize::from(self.length)
    }

    /// A header for a reply carrying `pdu_len` bytes of PDU.
    fn reply(&self, pdu_len: usize) -> Self {
        Self {
            length: (pdu_len + 1) as u16,
            ..*self
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&self.protocol_id.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
        out.push(self.unit_id);
    }
}

/// The two supported function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    WriteSingleRegister,
}

impl FunctionCode {
    pub const fn value(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => proto::READ_HOLDING_REGISTERS,
            FunctionCode::WriteSingleRegister => proto::WRITE_SINGLE_REGISTER,
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = Exception;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            proto::READ_HOLDING_REGISTERS => Ok(FunctionCode::ReadHoldingRegisters),
            proto::WRITE_SINGLE_REGISTER => Ok(FunctionCode::WriteSingleRegister),
            _ => Err(Exception::IllegalFunction),
        }
    }
}

/// A single-register request.
///
/// For a read the second field is nominally the register count; only one
/// register is ever returned so it is carried as an opaque value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub function: FunctionCode,
    pub address: u16,
    pub value: u16,
}

/// One decoded frame. `request` holds the exception to reply with when the
/// PDU could not be turned into a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub header: MbapHeader,
    pub function_code: u8,
    pub request: Result<Request, Exception>,
}

/// Successful result of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The value of the one addressed register.
    ReadHoldingRegisters(u16),
    /// Echo of the written address and value.
    WriteSingleRegister { address: u16, value: u16 },
}

impl Response {
    fn function(&self) -> FunctionCode {
        match self {
            Response::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Response::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
        }
    }
}

/// Decodes one complete frame.
///
/// An unsupported function code is rejected before the data section is
/// looked at; a supported one needs four data bytes.
pub fn decode(frame: &[u8]) -> Result<Decoded, DecodeError> {
    let header = MbapHeader::decode(frame)?;
    let expected = header.frame_len();
    let frame = frame.get(..expected).ok_or(DecodeError::Truncated {
        expected,
        actual: frame.len(),
    })?;
    let function_code = frame[MBAP_HEADER_LEN];
    let data = &frame[MBAP_HEADER_LEN + 1..];

    let request = FunctionCode::try_from(function_code).and_then(|function| match data {
        [address_hi, address_lo, value_hi, value_lo, ..] => Ok(Request {
            function,
            address: u16::from_be_bytes([*address_hi, *address_lo]),
            value: u16::from_be_bytes([*value_hi, *value_lo]),
        }),
        _ => Err(Exception::IllegalDataValue),
    });

    Ok(Decoded {
        header,
        function_code,
        request,
    })
}

pub fn encode_response(header: &MbapHeader, response: &Response) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(response.function().value());
    match *response {
        Response::ReadHoldingRegisters(word) => {
            pdu.push(2);
            pdu.extend_from_slice(&word.to_be_bytes());
        }
        Response::WriteSingleRegister { address, value } => {
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&value.to_be_bytes());
        }
    }
    with_header(header, &pdu)
}

pub fn encode_exception(header: &MbapHeader, function_code: u8, exception: Exception) -> Vec<u8> {
    with_header(
        header,
        &[function_code | proto::EXCEPTION_FLAG, exception.code()],
    )
}

fn with_header(header: &MbapHeader, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    header.reply(pdu.len()).encode(&mut out);
    out.extend_from_slice(pdu);
    out
}
