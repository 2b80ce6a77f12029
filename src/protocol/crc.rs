const POLYNOMIAL: u16 = 0xA001;
const INITIAL: u16 = 0xFFFF;

/// Modbus flavoured CRC-16, processed least significant bit first.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(INITIAL, |crc, &byte| {
        (0..8).fold(crc ^ byte as u16, |crc, _| {
            if crc & 0x0001 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            }
        })
    })
}

/// Writes the checksum of everything before the last two bytes into those bytes, high byte first.
///
/// Panics if `frame` is shorter than two bytes.
pub fn seal(frame: &mut [u8]) {
    debug_assert!(frame.len() >= 2, "frame too short to carry a checksum");
    let body = frame.len() - 2;
    let crc = crc16(&frame[..body]);
    frame[body..].copy_from_slice(&crc.to_be_bytes());
}

/// Returns `(stored, computed)` for a frame carrying a trailing checksum.
///
/// Panics if `frame` is shorter than two bytes.
pub fn checksums(frame: &[u8]) -> (u16, u16) {
    debug_assert!(frame.len() >= 2, "frame too short to carry a checksum");
    let body = frame.len() - 2;
    let stored = u16::from_be_bytes([frame[body], frame[body + 1]]);
    (stored, crc16(&frame[..body]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[]), INITIAL);
    }

    #[test]
    fn captured_fixed_frames() {
        let keepalive = [0x7A, 0x7A, 0x21, 0xD5, 0x0C, 0x00, 0x00, 0xAB, 0x0A, 0x0A];
        assert_eq!(crc16(&keepalive), 0xFCF9);
        let status_request = [0x7A, 0x7A, 0x21, 0xD5, 0x0C, 0x00, 0x00, 0xA2, 0x0A, 0x0A];
        assert_eq!(crc16(&status_request), 0xFE29);
    }

    #[test]
    fn seal_stores_high_byte_first() {
        let mut frame = [0x7A, 0x7A, 0x21, 0xD5, 0x0C, 0x00, 0x00, 0xAB, 0x0A, 0x0A, 0x00, 0x00];
        seal(&mut frame);
        assert_eq!(&frame[10..], &[0xFC, 0xF9]);
        let (stored, computed) = checksums(&frame);
        assert_eq!(stored, computed);
    }

    #[test]
    fn two_bytes_is_just_a_checksum() {
        let mut frame = [0x00, 0x00];
        seal(&mut frame);
        assert_eq!(frame, INITIAL.to_be_bytes());
        assert_eq!(checksums(&frame), (INITIAL, INITIAL));
    }

    #[test]
    #[should_panic]
    fn checksum_needs_two_bytes() {
        checksums(&[0x7A]);
    }
}
