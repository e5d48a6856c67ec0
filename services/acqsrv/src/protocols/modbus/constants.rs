//! Modbus protocol limits
//!
//! The 253-byte PDU ceiling bounds every per-request register and bit count.

/// MBAP header: transaction(2) + protocol(2) + length(2) + unit(1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU size: RS485 ADU (256) - address (1) - CRC (2)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (unit id + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// FC03/FC04: 1 + 1 + 2N <= 253
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC16: 1 + 2 + 2 + 1 + 2N <= 253
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// FC01/FC02 protocol ceiling
pub const MAX_READ_BITS: u16 = 2000;

/// FC15 protocol ceiling (0x7B0)
pub const MAX_WRITE_BITS: u16 = 1968;

pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
}

/// Total Modbus TCP frame size for a PDU of `pdu_len` bytes
#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + pdu_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_limits_fit_pdu() {
        assert!(1 + 1 + (MAX_READ_REGISTERS as usize * 2) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS as usize * 2) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_bit_limits_fit_pdu() {
        assert!(1 + 1 + (MAX_READ_BITS as usize).div_ceil(8) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + (MAX_WRITE_BITS as usize).div_ceil(8) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(mbap_frame_size(5), 12);
        assert_eq!(mbap_frame_size(MAX_PDU_SIZE), 260);
    }
}
