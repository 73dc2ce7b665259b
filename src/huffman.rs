//! Canonical Huffman code tables, shared by DEFLATE's literal/length,
//! distance and code-length alphabets and by each of BZIP2's per-block
//! trees.
//!
//! Construction takes a per-symbol array of code lengths (`0` meaning the
//! symbol is unused) and assigns canonical codes in `(length, symbol)`
//! order, the same convention RFC 1951 §3.2.2 uses and the one every
//! conforming encoder already produces its lengths for.

use crate::bitstream::BitStream;
use crate::error::{ErrorContext, ErrorKind, Res};

/// A decode-ready canonical Huffman table.
///
/// Internally this is the classic `first_code`/`first_index` scheme: for a
/// given code length, `first_code[len]` is the smallest code value of that
/// length and `first_index[len]` is the offset into `symbols` where codes of
/// that length begin (symbols are stored sorted by `(length, symbol)`).
pub struct HuffmanTable {
    max_len: u32,
    length_counts: Vec<u32>,
    first_code: Vec<u32>,
    first_index: Vec<u32>,
    symbols: Vec<u16>,
}

impl ErrorContext for HuffmanTable {
    fn describe(&self) -> Option<String> {
        Some(format!("huffman table, max_len {}", self.max_len))
    }
}

impl HuffmanTable {
    /// Builds a table from per-symbol code lengths.
    ///
    /// `max_len` bounds the longest code length that will be assigned a
    /// 32-bit canonical code cheaply; DEFLATE uses 15, BZIP2 up to 20, the
    /// DEFLATE code-length alphabet 7.
    ///
    /// `allow_incomplete_single` accommodates the one DEFLATE quirk where a
    /// tree with exactly one used symbol is legal despite leaving the Kraft
    /// sum incomplete: the lone symbol is canonicalized to a 1-bit code so
    /// `decode` still consumes a bit per RFC 1951 §3.2.7.
    #[track_caller]
    pub fn build(code_lengths: &[u8], max_len: u32, allow_incomplete_single: bool) -> Res<HuffmanTable> {
        let mut lengths: Vec<u8> = code_lengths.to_vec();
        for &len in &lengths {
            if len as u32 > max_len {
                return HuffmanTable::build_error("code length exceeds max_len");
            }
        }

        let used: Vec<usize> = lengths
            .iter()
            .enumerate()
            .filter(|&(_, &len)| len > 0)
            .map(|(i, _)| i)
            .collect();

        let single_symbol = allow_incomplete_single && used.len() == 1;
        if single_symbol {
            lengths[used[0]] = 1;
        }

        let mut length_counts = vec![0u32; max_len as usize + 1];
        for &len in &lengths {
            if len > 0 {
                length_counts[len as usize] += 1;
            }
        }

        if !single_symbol && !used.is_empty() {
            let kraft: u64 = (1..=max_len as usize)
                .map(|len| (length_counts[len] as u64) << (max_len as usize - len))
                .sum();
            if kraft != 1u64 << max_len {
                return HuffmanTable::build_error("Kraft sum is not exactly 1 (incomplete or over-subscribed code)");
            }
        }

        let mut first_code = vec![0u32; max_len as usize + 1];
        let mut code = 0u32;
        for len in 1..=max_len as usize {
            code = (code + length_counts[len - 1]) << 1;
            first_code[len] = code;
        }

        let mut first_index = vec![0u32; max_len as usize + 1];
        let mut running = 0u32;
        for len in 1..=max_len as usize {
            first_index[len] = running;
            running += length_counts[len];
        }

        let mut symbols = vec![0u16; running as usize];
        let mut next_slot = first_index.clone();
        for (sym, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let slot = &mut next_slot[len as usize];
            symbols[*slot as usize] = sym as u16;
            *slot += 1;
        }

        Ok(HuffmanTable {
            max_len,
            length_counts,
            first_code,
            first_index,
            symbols,
        })
    }

    #[track_caller]
    fn build_error(msg: &str) -> Res<HuffmanTable> {
        Err(crate::error::Error::new(ErrorKind::MalformedBlock).with_message(msg.to_string()))
    }

    /// Reads 1..=`max_len` bits MSB-first from `bits` and returns the
    /// decoded symbol.
    #[track_caller]
    pub fn decode(&self, bits: &mut BitStream) -> Res<u16> {
        let mut code = 0u32;
        for len in 1..=self.max_len as usize {
            code = (code << 1) | bits.read_bits(1)?;
            let count = self.length_counts[len];
            if count > 0 {
                let offset = code.wrapping_sub(self.first_code[len]);
                if offset < count {
                    return Ok(self.symbols[(self.first_index[len] + offset) as usize]);
                }
            }
        }
        self.raise(ErrorKind::MalformedBlock, "no matching huffman code")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::ByteOrder;

    #[test_log::test]
    fn builds_and_decodes_simple_table() {
        // symbols: 0 -> len2, 1 -> len1, 2 -> len3, 3 -> len3
        let lengths = [2u8, 1, 3, 3];
        let table = HuffmanTable::build(&lengths, 3, false).unwrap();
        // canonical codes: sym1=0 (1 bit), sym0=10 (2 bits), sym2=110, sym3=111
        // bitstream: 0 10 110 111 -> 01011011 10000000
        let bytes = [0b0101_1011, 0b1000_0000];
        let mut bs = BitStream::new(&bytes, ByteOrder::FrontToBack);
        assert_eq!(table.decode(&mut bs).unwrap(), 1);
        assert_eq!(table.decode(&mut bs).unwrap(), 0);
        assert_eq!(table.decode(&mut bs).unwrap(), 2);
        assert_eq!(table.decode(&mut bs).unwrap(), 3);
    }

    #[test_log::test]
    fn rejects_over_subscribed_code() {
        let lengths = [1u8, 1, 1];
        assert!(HuffmanTable::build(&lengths, 1, false).is_err());
    }

    #[test_log::test]
    fn rejects_under_subscribed_code() {
        // sym0 has the only defined code; len1/len2/len3 are left unused,
        // so the Kraft sum falls short of 1 instead of over it.
        let lengths = [1u8, 0, 0, 0];
        assert!(HuffmanTable::build(&lengths, 20, false).is_err());
    }

    #[test_log::test]
    fn single_symbol_consumes_one_bit() {
        let lengths = [0u8, 5, 0];
        let table = HuffmanTable::build(&lengths, 5, true).unwrap();
        let bytes = [0b0000_0000];
        let mut bs = BitStream::new(&bytes, ByteOrder::FrontToBack);
        assert_eq!(table.decode(&mut bs).unwrap(), 1);
    }
}
