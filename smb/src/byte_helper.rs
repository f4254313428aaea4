use smb_core::error::SMBError;
use smb_core::SMBResult;

pub(crate) fn u16_to_bytes(num: u16) -> [u8; 2] {
    num.to_le_bytes()
}

pub(crate) fn utf16_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16_to_bytes).collect()
}

pub(crate) fn utf16_string(bytes: &[u8]) -> SMBResult<String> {
    if bytes.len() % 2 != 0 {
        return Err(SMBError::parse_error("Odd UTF-16 byte count"));
    }
    let units = bytes.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect::<Vec<u16>>();
    String::from_utf16(&units).map_err(|_| SMBError::parse_error("Invalid UTF-16 string"))
}

/// Pads `buffer` with zeros up to the next multiple of `alignment`.
pub(crate) fn pad_to(buffer: &mut Vec<u8>, alignment: usize) {
    let rem = buffer.len() % alignment;
    if rem != 0 {
        buffer.resize(buffer.len() + alignment - rem, 0);
    }
}

pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}
