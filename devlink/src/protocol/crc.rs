//! CRC-32 (IEEE 802.3) checksum.
//!
//! Reflected polynomial `0xEDB88320`, seeded with `0xFFFFFFFF` and finalised
//! by XOR with `0xFFFFFFFF`. The 256-entry reduction table is computed at
//! compile time, so [`init`] costs nothing at runtime.

/// Reflected CRC-32 polynomial.
pub const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Initial value of a running checksum.
pub const SEED: u32 = 0xFFFF_FFFF;

/// Value XORed into the running checksum to finalise it.
pub const FINAL_XOR: u32 = 0xFFFF_FFFF;

static TABLE: [u32; 256] = build_table();

#[allow(clippy::cast_possible_truncation)]
const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Get the precomputed reduction table.
pub fn init() -> &'static [u32; 256] {
    &TABLE
}

/// Fold one byte into a running (unfinalised) checksum.
#[inline]
pub fn update(crc: u32, byte: u8) -> u32 {
    TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
}

/// Apply the closing XOR to a running checksum.
#[inline]
pub fn finalize(crc: u32) -> u32 {
    crc ^ FINAL_XOR
}

/// Compute the CRC-32 of a byte slice in one call.
pub fn crc32(data: &[u8]) -> u32 {
    finalize(data.iter().fold(SEED, |crc, &b| update(crc, b)))
}

/// Incremental CRC-32 accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32 {
    state: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Start a new checksum.
    pub fn new() -> Self {
        Self { state: SEED }
    }

    /// Fold one byte in.
    pub fn push(&mut self, byte: u8) {
        self.state = update(self.state, byte);
    }

    /// Fold a slice in.
    pub fn extend(&mut self, data: &[u8]) {
        for &b in data {
            self.push(b);
        }
    }

    /// Finalised checksum of everything folded in so far.
    pub fn value(&self) -> u32 {
        finalize(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_table_entries() {
        let table = init();
        assert_eq!(table[0], 0);
        assert_eq!(table[1], 0x7707_3096);
        assert_eq!(table[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut crc = Crc32::new();
        crc.extend(&data[..10]);
        crc.extend(&data[10..]);
        assert_eq!(crc.value(), crc32(data));
        assert_eq!(crc.value(), 0x414F_A339);
    }
}
