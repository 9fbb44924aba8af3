//! Modbus protocol and connection constants

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes, followed by Unit ID(1)
/// Note: the Unit ID is counted by the length field, not by MBAP_HEADER_LEN
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Response buffer size for receiving Modbus frames (6 + 254 = 260 bytes max)
pub const MODBUS_RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Exception bit set in the function code of an error response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Exception code 2: Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

// ============================================================================
// Connection Defaults
// ============================================================================

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Request retries after a timeout (kept minimal to fail fast)
pub const DEFAULT_RETRIES: u8 = 1;

// ============================================================================
// Backoff Policy
// ============================================================================

/// Consecutive failures before connection attempts are throttled
pub const BACKOFF_THRESHOLD_FAILURES: u32 = 3;

/// Backoff window at the threshold (5 minutes)
pub const BACKOFF_BASE: Duration = Duration::from_secs(5 * 60);

/// Upper bound of the backoff window (60 minutes)
pub const BACKOFF_MAX: Duration = Duration::from_secs(60 * 60);

/// Calculate total Modbus TCP frame size (MBAP header + unit id + PDU)
#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + 1 + pdu_len
}
