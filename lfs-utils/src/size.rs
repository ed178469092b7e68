//! Byte-size formatting, lifted from the teacher's `utils::util::ByteSize`.

use std::fmt;
use std::mem::size_of;

/// Performs the log2 operation on the given integer.
///
/// If the result is undefined (`n == 0`), returns `None`.
pub fn log2(n: u64) -> Option<u64> {
    let num_bits = (size_of::<u64>() * 8) as u64;
    let n = num_bits - n.leading_zeros() as u64;
    if n > 0 {
        Some(n - 1)
    } else {
        None
    }
}

/// A number of bytes, for human-readable display in CLI output.
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn from_sectors_count(cnt: u64, sector_size: u64) -> Self {
        Self(cnt * sector_size)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut order = log2(self.0).unwrap_or(0) / log2(1024).unwrap();

        let suffix = match order {
            0 => "bytes",
            1 => "KiB",
            2 => "MiB",
            3 => "GiB",
            4 => "TiB",
            5 => "PiB",
            6 => "EiB",

            _ => {
                order = 0;
                "bytes"
            }
        };

        let unit = 1024u64.pow(order as u32);
        write!(fmt, "{} {}", self.0 / unit, suffix)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bytesize() {
        assert_eq!(format!("{}", ByteSize(0)), "0 bytes");
        assert_eq!(format!("{}", ByteSize(1023)), "1023 bytes");
        assert_eq!(format!("{}", ByteSize(1024)), "1 KiB");
        assert_eq!(format!("{}", ByteSize(1024 * 1024)), "1 MiB");
    }
}
