//! CRC-16/MODBUS checksum for RTU framing.
//!
//! Reflected polynomial 0xA001 (0x8005 unreflected), initial value 0xFFFF.
//! The checksum covers the unit address and the PDU and travels
//! little-endian, low byte first.

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};

/// Table-driven CRC calculator
pub const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Number of CRC bytes trailing an RTU frame
pub const CRC_LENGTH: usize = 2;

/// Compute the checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the checksum of `frame` to itself
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing checksum of a complete frame
pub fn check_crc(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() <= CRC_LENGTH {
        return Err(ModbusError::frame(format!(
            "RTU frame too short for CRC: {} bytes",
            frame.len()
        )));
    }

    let data_len = frame.len() - CRC_LENGTH;
    let expected = crc16(&frame[..data_len]);
    let actual = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);

    if expected != actual {
        return Err(ModbusError::crc_mismatch(expected, actual));
    }
    Ok(())
}

/// Boolean form of [`check_crc`]
pub fn verify_crc(frame: &[u8]) -> bool {
    check_crc(frame).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        // Values as read from the wire, low byte first.
        let cases: [(&[u8], [u8; 2]); 3] = [
            (&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02], [0xC4, 0x0B]),
            (&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01], [0x84, 0x0A]),
            (&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03], [0x76, 0x87]),
        ];

        for (data, wire) in cases {
            assert_eq!(crc16(data).to_le_bytes(), wire, "CRC mismatch for {:02X?}", data);
        }
    }

    #[test]
    fn test_append_and_verify() {
        let mut frame = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        append_crc(&mut frame);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
        assert!(verify_crc(&frame));
        assert_eq!(crc16(&frame[..6]), crc16(&frame[..6]));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let mut frame = vec![0x01, 0x10, 0x00, 0x5D, 0x00, 0x02, 0x04, 0x00, 0x19, 0xFF, 0xFE];
        append_crc(&mut frame);

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!verify_crc(&corrupted), "flip at byte {} bit {} not detected", byte, bit);
            }
        }
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(matches!(check_crc(&[0xC4, 0x0B]), Err(ModbusError::Frame { .. })));
        assert!(matches!(
            check_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0x0B, 0xC4]),
            Err(ModbusError::CrcMismatch { expected: 0x0BC4, actual: 0xC40B })
        ));
    }
}
