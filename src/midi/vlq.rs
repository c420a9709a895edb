//! Variable-length quantities as used by Standard MIDI Files.
//!
//! A VLQ stores 7 bits per byte, most significant group first, with the top
//! bit of every byte except the last set to signal continuation.

/// Largest value representable in the four bytes SMF allows.
pub const MAX_VLQ: u32 = 0x0FFF_FFFF;

/// Maximum number of bytes in a MIDI VLQ.
const MAX_VLQ_BYTES: usize = 4;

/// Why a VLQ could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlqError {
    /// The buffer ended before the final byte.
    Truncated,
    /// More than four continuation bytes.
    TooLong,
}

/// Reads a VLQ starting at `*pos`, advancing `*pos` past it.
///
/// # Arguments
///
/// * `data` - Buffer to read from
/// * `pos` - Cursor into `data`; updated on success
///
/// # Returns
///
/// The decoded value, or the reason decoding failed
pub fn read_vlq(data: &[u8], pos: &mut usize) -> Result<u32, VlqError> {
    let mut value = 0u32;
    for i in 0..MAX_VLQ_BYTES {
        let byte = *data.get(*pos + i).ok_or(VlqError::Truncated)?;
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            *pos += i + 1;
            return Ok(value);
        }
    }
    Err(VlqError::TooLong)
}

/// Writes a variable-length quantity in canonical (minimal) form.
///
/// # Arguments
///
/// * `value` - The value to encode (clamped to [`MAX_VLQ`])
/// * `buffer` - Output buffer to append to
pub fn write_vlq(value: u32, buffer: &mut Vec<u8>) {
    let value = value.min(MAX_VLQ);
    let mut groups = [0u8; MAX_VLQ_BYTES];
    let mut count = 0;
    let mut temp = value;
    loop {
        groups[count] = (temp & 0x7F) as u8;
        count += 1;
        temp >>= 7;
        if temp == 0 {
            break;
        }
    }

    // Most significant group first; every byte but the last carries the continuation bit
    for i in (0..count).rev() {
        if i > 0 {
            buffer.push(groups[i] | 0x80);
        } else {
            buffer.push(groups[i]);
        }
    }
}

/// Number of bytes [`write_vlq`] will emit for `value`.
pub fn vlq_len(value: u32) -> usize {
    match value.min(MAX_VLQ) {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq_encoding() {
        let mut buf = Vec::new();

        write_vlq(0, &mut buf);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(127, &mut buf);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(128, &mut buf);
        assert_eq!(buf, vec![0x81, 0x00]);

        buf.clear();
        write_vlq(0x3FFF, &mut buf);
        assert_eq!(buf, vec![0xFF, 0x7F]);

        buf.clear();
        write_vlq(MAX_VLQ, &mut buf);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_vlq_canonical_reencode() {
        for value in [0u32, 1, 63, 127, 128, 480, 8192, 16383, 16384, 1_000_000, MAX_VLQ] {
            let mut buf = Vec::new();
            write_vlq(value, &mut buf);
            assert_eq!(buf.len(), vlq_len(value));

            let mut pos = 0;
            assert_eq!(read_vlq(&buf, &mut pos), Ok(value));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_vlq_read_advances_cursor() {
        let data = [0x83, 0x60, 0x40, 0x00];
        let mut pos = 0;
        assert_eq!(read_vlq(&data, &mut pos), Ok(480));
        assert_eq!(pos, 2);
        assert_eq!(read_vlq(&data, &mut pos), Ok(0x40));
        assert_eq!(read_vlq(&data, &mut pos), Ok(0));
        assert_eq!(pos, 4);
    }

    #[test]
    fn test_vlq_errors() {
        let mut pos = 0;
        assert_eq!(read_vlq(&[0x81], &mut pos), Err(VlqError::Truncated));
        assert_eq!(pos, 0);

        let mut pos = 0;
        assert_eq!(
            read_vlq(&[0x81, 0x81, 0x81, 0x81, 0x00], &mut pos),
            Err(VlqError::TooLong)
        );
    }
}
