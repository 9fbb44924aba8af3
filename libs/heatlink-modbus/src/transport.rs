//! Modbus TCP framing
//!
//! Builds MBAP frames and validates responses against the request in flight.
//! Requests are serialized per connection, so at most one is pending.

use tracing::debug;

use crate::constants::{EXCEPTION_FLAG, MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, Result};
use crate::pdu::ModbusPdu;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (fixed to 0)
    pub protocol_id: u16,
    /// Length field (unit id + PDU)
    pub length: u16,
    /// Unit identifier (slave ID)
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the 7 header bytes (MBAP + unit id)
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MBAP_HEADER_LEN + 1 {
            return Err(ModbusError::protocol("TCP frame too short"));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }

    /// Validate the length field read from the wire
    pub fn validate_length(length: usize) -> Result<()> {
        if length < 2 || length > MAX_MBAP_LENGTH {
            return Err(ModbusError::protocol(format!(
                "Invalid TCP frame length: {}",
                length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    transaction_id: u16,
    function_code: u8,
    unit_id: u8,
}

/// Modbus TCP frame processor
#[derive(Debug)]
pub struct FrameProcessor {
    pending: Option<PendingRequest>,
    next_transaction_id: u16,
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor {
    pub fn new() -> Self {
        Self {
            pending: None,
            next_transaction_id: 1,
        }
    }

    /// Get next transaction ID, wraps from 0xFFFF to 0x0000
    pub fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build a complete TCP frame and remember it as the pending request
    pub fn build_frame(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let transaction_id = self.next_transaction_id();
        let function_code = pdu.function_code().unwrap_or(0);

        self.pending = Some(PendingRequest {
            transaction_id,
            function_code,
            unit_id,
        });

        build_tcp_frame_with_id(unit_id, pdu, transaction_id)
    }

    /// Forget the pending request (after a timeout or a dropped stream)
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Whether `transaction_id` belongs to the pending request
    pub fn is_pending(&self, transaction_id: u16) -> bool {
        self.pending
            .is_some_and(|pending| pending.transaction_id == transaction_id)
    }

    /// Parse a received TCP frame and match it with the pending request
    pub fn parse_frame(&mut self, data: &[u8]) -> Result<(u8, ModbusPdu)> {
        let header = MbapHeader::parse(data)?;

        debug!(
            "MBAP header: trans_id={:04X}, protocol_id={:04X}, length={}, unit_id={}",
            header.transaction_id, header.protocol_id, header.length, header.unit_id
        );

        if header.protocol_id != 0 {
            return Err(ModbusError::protocol(format!(
                "Invalid protocol ID: expected 0, got {}",
                header.protocol_id
            )));
        }

        if data.len() != MBAP_HEADER_LEN + header.length as usize {
            return Err(ModbusError::protocol(format!(
                "Invalid TCP frame length: expected {}, got {}",
                MBAP_HEADER_LEN + header.length as usize,
                data.len()
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[MBAP_HEADER_LEN + 1..])?;

        let pending = self
            .pending
            .take()
            .ok_or_else(|| ModbusError::protocol("Response without pending request"))?;

        if pending.transaction_id != header.transaction_id {
            return Err(ModbusError::protocol(format!(
                "Transaction ID mismatch: expected {:04X}, got {:04X}",
                pending.transaction_id, header.transaction_id
            )));
        }

        let response_fc = pdu.function_code().map(|fc| fc & !EXCEPTION_FLAG);
        if response_fc != Some(pending.function_code) || header.unit_id != pending.unit_id {
            return Err(ModbusError::protocol(format!(
                "Response mismatch: expected unit {} FC{:02X}, got unit {} FC{:02X}",
                pending.unit_id,
                pending.function_code,
                header.unit_id,
                response_fc.unwrap_or(0)
            )));
        }

        Ok((header.unit_id, pdu))
    }
}

/// Build a TCP frame with a specific transaction ID (MBAP + unit id + PDU)
pub fn build_tcp_frame_with_id(unit_id: u8, pdu: &ModbusPdu, transaction_id: u16) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;

    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu.as_slice());

    debug!(
        "Building TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, PDU_len={}",
        transaction_id,
        unit_id,
        pdu.function_code().unwrap_or(0),
        pdu.len()
    );

    frame
}
