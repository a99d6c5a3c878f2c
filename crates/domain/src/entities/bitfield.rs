use bytes::Bytes;

/// Which pieces a peer holds. Bit `i` is the high-order-first bit `i % 8`
/// of byte `i / 8`; spare trailing bits are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: u32,
}

impl Bitfield {
    pub fn new(piece_count: u32) -> Self {
        Self {
            bits: vec![0; (piece_count as usize).div_ceil(8)],
            piece_count,
        }
    }

    /// Builds a bitfield from wire bytes. Short payloads are zero-extended,
    /// long payloads truncated, and spare bits cleared.
    pub fn from_bytes(bytes: &[u8], piece_count: u32) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize((piece_count as usize).div_ceil(8), 0);

        let mut bitfield = Self { bits, piece_count };
        bitfield.clear_spare_bits();
        bitfield
    }

    pub fn from_indices(indices: impl IntoIterator<Item = u32>, piece_count: u32) -> Self {
        let mut bitfield = Self::new(piece_count);
        for index in indices {
            bitfield.set(index);
        }
        bitfield
    }

    pub fn has(&self, index: u32) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte = self.bits[(index / 8) as usize];
        (byte >> (7 - index % 8)) & 1 == 1
    }

    pub fn set(&mut self, index: u32) {
        if index >= self.piece_count {
            return;
        }
        self.bits[(index / 8) as usize] |= 1 << (7 - index % 8);
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn count(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.piece_count).filter(|i| self.has(*i))
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count as usize;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFF << spare;
            }
        }
    }
}
