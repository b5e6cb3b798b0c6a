// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

pub use ethereum_types::{
    Address, BigEndianHash, H128, H160, H256, H512, H520, H64, U128, U256,
    U512, U64,
};

/// Reads a big-endian `u64` from the first eight bytes of `bytes`. Shorter
/// slices are zero-extended on the left, the way storage slots are decoded.
pub fn u64_from_be_slice(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}

/// Reads a little-endian `u64` from the first eight bytes of `bytes`, used
/// for consensus-provided seeds.
pub fn u64_from_le_slice(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_slice_is_zero_extended() {
        assert_eq!(u64_from_be_slice(&[0x27, 0x10]), 0x2710);
        assert_eq!(u64_from_be_slice(&[]), 0);
        assert_eq!(
            u64_from_be_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0xff]),
            1 << 56
        );
    }

    #[test]
    fn le_slice_reads_prefix() {
        assert_eq!(u64_from_le_slice(&[0x10, 0x27]), 0x2710);
        assert_eq!(u64_from_le_slice(&[1]), 1);
    }
}
