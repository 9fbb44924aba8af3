//! Modbus PDU data structure
//!
//! Fixed-size stack array, no heap allocation per request.

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    MAX_PDU_SIZE,
};
use crate::error::{ModbusError, Result};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            if pdu.is_exception() {
                debug!(
                    "PDU parsed: FC={:02X} ({}), exception={:02X}",
                    fc,
                    function_code_description(fc),
                    pdu.exception_code().unwrap_or(0)
                );
            } else {
                debug!(
                    "PDU parsed: FC={:02X} ({}), data_len={}",
                    fc,
                    function_code_description(fc),
                    pdu.len - 1
                );
            }
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }

    /// Turn an exception response into an error, pass through otherwise
    pub fn check_exception(&self) -> Result<()> {
        match (self.function_code(), self.exception_code()) {
            (Some(fc), Some(code)) if self.is_exception() => Err(ModbusError::Exception {
                function: fc & !EXCEPTION_FLAG,
                code,
            }),
            (Some(_), None) if self.is_exception() => {
                Err(ModbusError::protocol("Exception response without code"))
            },
            _ => Ok(()),
        }
    }

    /// Extract register values from a FC03/FC04 response
    pub fn parse_registers(&self, function_code: u8, expected_count: u16) -> Result<Vec<u16>> {
        self.check_exception()?;

        let pdu = self.as_slice();
        if pdu.len() < 2 {
            return Err(ModbusError::protocol(format!(
                "PDU too short: {} bytes",
                pdu.len()
            )));
        }

        let actual_fc = pdu[0];
        if actual_fc != function_code {
            return Err(ModbusError::protocol(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                function_code, actual_fc
            )));
        }

        let byte_count = pdu[1] as usize;
        let expected_bytes = expected_count as usize * 2;
        if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
            return Err(ModbusError::protocol(format!(
                "Byte count mismatch for FC{:02X}: expected {}, declared {}, available {}",
                function_code,
                expected_bytes,
                byte_count,
                pdu.len() - 2
            )));
        }

        Ok(pdu[2..2 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Validate a FC06 echo response against the request
    pub fn parse_write_echo(&self, address: u16, value: u16) -> Result<()> {
        self.check_exception()?;

        let pdu = self.as_slice();
        if pdu.len() != 5 || pdu[0] != FC_WRITE_SINGLE_REGISTER {
            return Err(ModbusError::protocol(format!(
                "Invalid write response: {} bytes",
                pdu.len()
            )));
        }

        let echoed_address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let echoed_value = u16::from_be_bytes([pdu[3], pdu[4]]);
        if echoed_address != address || echoed_value != value {
            return Err(ModbusError::protocol(format!(
                "Write echo mismatch: sent {}={}, got {}={}",
                address, value, echoed_address, echoed_value
            )));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable function code description
fn function_code_description(fc: u8) -> &'static str {
    match fc & !EXCEPTION_FLAG {
        FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
        FC_READ_INPUT_REGISTERS => "Read Input Registers",
        FC_WRITE_SINGLE_REGISTER => "Write Single Register",
        _ => "Unknown Function",
    }
}

/// PDU builder - fluent API
#[derive(Default)]
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn value(mut self, value: u16) -> Result<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }

    /// Build a read request PDU for FC03/FC04
    pub fn build_read_request(fc: u8, start_address: u16, quantity: u16) -> Result<ModbusPdu> {
        if !matches!(fc, FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS) {
            return Err(ModbusError::protocol(format!(
                "build_read_request only supports FC03/FC04, got FC{:02X}",
                fc
            )));
        }
        Ok(PduBuilder::new()
            .function_code(fc)?
            .address(start_address)?
            .quantity(quantity)?
            .build())
    }

    /// Build a FC06 write single register request
    pub fn build_write_single_register(address: u16, value: u16) -> Result<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_SINGLE_REGISTER)?
            .address(address)?
            .value(value)?
            .build())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_pdu_basic_operations() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());

        pdu.push(0x04).unwrap();
        pdu.push_u16(0x7531).unwrap();
        pdu.push_u16(0x0001).unwrap();

        assert_eq!(pdu.len(), 5);
        assert_eq!(pdu.function_code(), Some(0x04));
        assert!(!pdu.is_exception());
        assert_eq!(pdu.as_slice(), &[0x04, 0x75, 0x31, 0x00, 0x01]);
    }

    #[test]
    fn test_build_read_request() {
        let pdu = PduBuilder::build_read_request(0x03, 40001, 1).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x9C, 0x41, 0x00, 0x01]);
    }

    #[test]
    fn test_build_read_request_rejects_other_codes() {
        let result = PduBuilder::build_read_request(0x01, 0, 1);
        assert!(matches!(result, Err(ModbusError::Protocol(_))));
    }

    #[test]
    fn test_build_write_single_register() {
        let pdu = PduBuilder::build_write_single_register(41103, 65290).unwrap();
        assert_eq!(pdu.as_slice(), &[0x06, 0xA0, 0x8F, 0xFF, 0x0A]);
    }

    #[test]
    fn test_pdu_overflow() {
        let mut pdu = ModbusPdu::new();
        for i in 0..MAX_PDU_SIZE {
            pdu.push(i as u8).unwrap();
        }
        assert!(pdu.push(0xFF).is_err());
        assert!(ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
    }

    // ========================================================================
    // Response Parsing
    // ========================================================================

    #[test]
    fn test_parse_registers_single() {
        let pdu = ModbusPdu::from_slice(&[0x04, 0x02, 0xFF, 0x0A]).unwrap();
        assert_eq!(pdu.parse_registers(0x04, 1).unwrap(), vec![65290]);
    }

    #[test]
    fn test_parse_registers_function_mismatch() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x00, 0x01]).unwrap();
        assert!(matches!(
            pdu.parse_registers(0x04, 1),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_registers_short_payload() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x00]).unwrap();
        assert!(pdu.parse_registers(0x03, 1).is_err());
    }

    #[test]
    fn test_exception_response() {
        let pdu = ModbusPdu::from_slice(&[0x84, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));

        let err = pdu.parse_registers(0x04, 1).unwrap_err();
        assert_eq!(
            err,
            ModbusError::Exception {
                function: 0x04,
                code: 0x02
            }
        );
        assert!(err.is_illegal_address());
    }

    #[test]
    fn test_parse_write_echo() {
        let pdu = ModbusPdu::from_slice(&[0x06, 0xA0, 0x8F, 0x01, 0x2C]).unwrap();
        assert!(pdu.parse_write_echo(41103, 300).is_ok());
        assert!(pdu.parse_write_echo(41103, 301).is_err());
    }
}
