//! Byte buffer helpers shared by the transfer engine.

use crate::error::{Result, TransferError};

/// Parse a string of `0`/`1` digits into bytes, eight digits per byte.
pub fn bits_to_bytes(bits: &str) -> Result<Vec<u8>> {
    let digits = bits.as_bytes();
    if digits.len() % 8 != 0 {
        return Err(TransferError::MalformedBitLength(digits.len()));
    }

    digits
        .chunks(8)
        .enumerate()
        .map(|(byte_index, group)| {
            group.iter().enumerate().try_fold(0u8, |acc, (bit_index, digit)| {
                let bit = match *digit {
                    b'0' => 0,
                    b'1' => 1,
                    _ => return Err(TransferError::InvalidBinaryDigit(byte_index * 8 + bit_index)),
                };
                Ok((acc << 1) | bit)
            })
        })
        .collect()
}

/// Render every byte as exactly eight binary digits.
pub fn bytes_to_bits(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:08b}")).collect()
}

/// Concatenate buffers in order into one contiguous buffer.
pub fn concat_buffers<B: AsRef<[u8]>>(buffers: &[B]) -> Vec<u8> {
    let total = buffers.iter().map(|b| b.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for buffer in buffers {
        out.extend_from_slice(buffer.as_ref());
    }
    out
}
