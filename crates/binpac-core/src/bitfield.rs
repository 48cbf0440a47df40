//! Pure bit-range extraction used both to validate the scenario in spec §8.6
//! directly and by [crate::parser_builder::ParserBuilder] to decide the
//! shift/mask constants it bakes into the emitted `rt_bitfield_extract`
//! call.
use crate::types::{BitOrder, BitRange};

/// Extracts the sub-range `[lo..hi]` (inclusive) out of `storage`, a value
/// `width_bits` wide. Under `Msb0` the range indices are inverted against
/// the word width before masking, per spec §4.4.
pub fn extract(storage: u64, width_bits: u32, range: &BitRange, order: BitOrder) -> u64 {
  let (lo, hi) = match order {
    BitOrder::Lsb0 => (range.lo as u32, range.hi as u32),
    BitOrder::Msb0 => (width_bits - 1 - range.hi as u32, width_bits - 1 - range.lo as u32),
  };
  let width = hi - lo + 1;
  let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
  (storage >> lo) & mask
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lsb0_bitfield_matches_spec_scenario() {
    // Unit E: b: bitfield(8){ lo: 0..3; hi: 4..7; } &bitorder=lsb0, input 0xA5.
    let storage = 0xA5u64;
    let lo = BitRange { name: "lo".into(), lo: 0, hi: 3 };
    let hi = BitRange { name: "hi".into(), lo: 4, hi: 7 };
    assert_eq!(extract(storage, 8, &lo, BitOrder::Lsb0), 0x5);
    assert_eq!(extract(storage, 8, &hi, BitOrder::Lsb0), 0xA);
  }

  #[test]
  fn msb0_inverts_indices_against_word_width() {
    let storage = 0b1000_0001u64;
    let range = BitRange { name: "r".into(), lo: 0, hi: 0 };
    // MSB0 bit 0 is the top bit of an 8-bit word.
    assert_eq!(extract(storage, 8, &range, BitOrder::Msb0), 1);
  }
}
