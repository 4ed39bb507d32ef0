//! Reconciles the device's little-endian wire layout with the host's.
//!
//! Decoding reads every field the way the host's memory would hold it and then
//! reorders the multi-byte fields when host and device disagree. Encoding is the
//! inverse. The host order is a parameter so a big-endian machine can be
//! exercised on any test runner.

/// Order of the bytes inside a multi-byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// The digiBASE always talks little-endian.
    pub const DEVICE: ByteOrder = ByteOrder::Little;

    /// Order of the machine this crate was compiled for.
    pub const fn host() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn matches_device(self) -> bool {
        self == Self::DEVICE
    }

    pub fn load_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn load_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn store_u16(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn store_u32(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::host()
    }
}

/// Values whose multi-byte parts can be reversed in place.
/// Single-byte parts must be left untouched.
pub trait SwapBytes: Sized {
    fn swap_bytes(self) -> Self;
}

impl SwapBytes for u16 {
    fn swap_bytes(self) -> Self {
        u16::swap_bytes(self)
    }
}

impl SwapBytes for u32 {
    fn swap_bytes(self) -> Self {
        u32::swap_bytes(self)
    }
}

impl SwapBytes for i32 {
    fn swap_bytes(self) -> Self {
        i32::swap_bytes(self)
    }
}

/// Device layout to host layout. A no-op on little-endian hosts.
pub fn to_host<T: SwapBytes>(value: T, host: ByteOrder) -> T {
    if host.matches_device() {
        value
    } else {
        value.swap_bytes()
    }
}

/// Host layout to device layout, the inverse of [`to_host`].
pub fn to_device<T: SwapBytes>(value: T, host: ByteOrder) -> T {
    to_host(value, host)
}

/// Splits a device buffer into 32-bit words. A trailing partial word is dropped.
pub fn decode_words(bytes: &[u8], host: ByteOrder) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| to_host(host.load_u32([c[0], c[1], c[2], c[3]]), host))
        .collect()
}

/// Same as [`decode_words`] for signed channel counts.
pub fn decode_counts(bytes: &[u8], host: ByteOrder) -> Vec<i32> {
    decode_words(bytes, host)
        .into_iter()
        .map(|w| w as i32)
        .collect()
}

/// Lays out 32-bit words the way the device sends them.
pub fn encode_words(words: &[u32], host: ByteOrder) -> Vec<u8> {
    words
        .iter()
        .flat_map(|&w| host.store_u32(to_device(w, host)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[test]
    #[case(ByteOrder::Little)]
    #[case(ByteOrder::Big)]
    fn words_follow_device_order(#[case] host: ByteOrder) {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x80];
        assert_eq!(vec![0x1234_5678, 0x8000_0001], decode_words(&bytes, host));
    }

    #[rstest::rstest]
    #[test]
    #[case(ByteOrder::Little)]
    #[case(ByteOrder::Big)]
    fn encode_words_is_inverse(#[case] host: ByteOrder) {
        let words = [0, 1, 0xdead_beef, u32::MAX];
        assert_eq!(
            encode_words(&words, ByteOrder::Little),
            encode_words(&words, host)
        );
        assert_eq!(words.to_vec(), decode_words(&encode_words(&words, host), host));
    }

    #[test]
    fn big_endian_host_swaps() {
        assert_eq!(0x3412, to_host(0x1234u16, ByteOrder::Big));
        assert_eq!(0x1234, to_host(0x1234u16, ByteOrder::Little));
        assert_eq!(-2, decode_counts(&[0xfe, 0xff, 0xff, 0xff], ByteOrder::Big)[0]);
    }

    #[test]
    fn partial_word_is_dropped() {
        assert_eq!(vec![1], decode_words(&[1, 0, 0, 0, 9, 9], ByteOrder::Little));
    }
}
