//! TCP message framing
//!
//! Each message travels as
//!
//! ```text
//! [STX][sequence number: u32 LE][body length: u64 LE][body: UTF-8][ETX]
//! ```
//!
//! and is answered by the receiver with a single [`ACK`] byte.

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;

/// Bytes between STX and the body
pub const HEADER_LEN: usize = 4 + 8;

/// Encode one message frame
pub fn encode(sequence_number: u32, body: &str) -> Vec<u8> {
    let body = body.as_bytes();
    let mut frame = Vec::with_capacity(1 + HEADER_LEN + body.len() + 1);
    frame.push(STX);
    frame.extend_from_slice(&sequence_number.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
    frame.extend_from_slice(body);
    frame.push(ETX);
    frame
}

/// Split a header into sequence number and body length
pub fn decode_header(header: &[u8; HEADER_LEN]) -> (u32, u64) {
    let mut seq = [0u8; 4];
    let mut len = [0u8; 8];
    seq.copy_from_slice(&header[..4]);
    len.copy_from_slice(&header[4..]);
    (u32::from_le_bytes(seq), u64::from_le_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(0x0102_0304, "hé");
        assert_eq!(
            frame,
            vec![
                0x02, 0x04, 0x03, 0x02, 0x01, 3, 0, 0, 0, 0, 0, 0, 0, b'h', 0xC3, 0xA9, 0x03
            ]
        );
    }

    #[test]
    fn test_header_decodes() {
        let frame = encode(7, "abc");
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&frame[1..1 + HEADER_LEN]);
        assert_eq!(decode_header(&header), (7, 3));
    }

    #[test]
    fn test_empty_body() {
        let frame = encode(1, "");
        assert_eq!(frame.len(), 1 + HEADER_LEN + 1);
        assert_eq!(frame.last(), Some(&ETX));
    }
}
