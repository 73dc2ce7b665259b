//! RFC 1951 DEFLATE, plus the RFC 1950 zlib wrapper used by the formats in
//! this crate's corpus that store Adler-32 trailers around a raw DEFLATE
//! stream.

use crate::bitstream::{BitStream, ByteOrder};
use crate::checksum::adler32;
use crate::error::{CheckedSlice, Error, ErrorContext, ErrorKind, Res};
use crate::huffman::HuffmanTable;

const CODE_LENGTH_ALPHABET: [usize; 19] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

/// `(base, extra_bits)` for run-length symbols 257..=285.
const LENGTH_TABLE: [(u32, u32); 29] = [
    (3, 0), (4, 0), (5, 0), (6, 0), (7, 0), (8, 0), (9, 0), (10, 0),
    (11, 1), (13, 1), (15, 1), (17, 1),
    (19, 2), (23, 2), (27, 2), (31, 2),
    (35, 3), (43, 3), (51, 3), (59, 3),
    (67, 4), (83, 4), (99, 4), (115, 4),
    (131, 5), (163, 5), (195, 5), (227, 5),
    (258, 0),
];

/// `(base, extra_bits)` for distance symbols 0..=29.
const DISTANCE_TABLE: [(u32, u32); 30] = [
    (1, 0), (2, 0), (3, 0), (4, 0),
    (5, 1), (7, 1),
    (9, 2), (13, 2),
    (17, 3), (25, 3),
    (33, 4), (49, 4),
    (65, 5), (97, 5),
    (129, 6), (193, 6),
    (257, 7), (385, 7),
    (513, 8), (769, 8),
    (1025, 9), (1537, 9),
    (2049, 10), (3073, 10),
    (4097, 11), (6145, 11),
    (8193, 12), (12289, 12),
    (16385, 13), (24577, 13),
];

/// Bounds-checked write cursor over the caller's output slice, with support
/// for LZ77 back-references into the bytes already produced.
struct Output<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl ErrorContext for Output<'_> {
    fn describe(&self) -> Option<String> {
        Some(format!("output {}/{}", self.len, self.buf.len()))
    }
}

impl<'a> Output<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Output { buf, len: 0 }
    }

    #[track_caller]
    fn push(&mut self, byte: u8) -> Res<()> {
        if self.len >= self.buf.len() {
            return self.raise(ErrorKind::CapacityExceeded, "output buffer full");
        }
        self.buf[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    #[track_caller]
    fn copy_back(&mut self, distance: usize, length: usize) -> Res<()> {
        self.assert_le(distance, self.len, ErrorKind::DistanceOutOfRange)?;
        self.assert(distance > 0, ErrorKind::DistanceOutOfRange, "zero distance")?;
        for _ in 0..length {
            let byte = self.buf[self.len - distance];
            self.push(byte)?;
        }
        Ok(())
    }
}

fn fixed_literal_lengths() -> [u8; 288] {
    let mut lengths = [0u8; 288];
    for (i, l) in lengths.iter_mut().enumerate() {
        *l = match i {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    lengths
}

fn fixed_distance_lengths() -> [u8; 30] {
    [5u8; 30]
}

/// Reads the dynamic block header (HLIT/HDIST/HCLEN, the code-length
/// alphabet, then the literal/length and distance code lengths it encodes)
/// and builds both Huffman tables.
fn read_dynamic_tables(bits: &mut BitStream) -> Res<(HuffmanTable, HuffmanTable)> {
    let hlit = bits.read_bits(5)? as usize + 257;
    let hdist = bits.read_bits(5)? as usize + 1;
    let hclen = bits.read_bits(4)? as usize + 4;

    let mut cl_lengths = [0u8; 19];
    for &sym in CODE_LENGTH_ALPHABET.iter().take(hclen) {
        cl_lengths[sym] = bits.read_bits(3)? as u8;
    }
    let cl_table = HuffmanTable::build(&cl_lengths, 7, false)?;

    let total = hlit + hdist;
    let mut lengths = Vec::with_capacity(total);
    while lengths.len() < total {
        let sym = cl_table.decode(bits)?;
        match sym {
            0..=15 => lengths.push(sym as u8),
            16 => {
                let prev = *lengths
                    .last()
                    .ok_or_else(|| Error::new(ErrorKind::MalformedBlock).with_message("repeat with no previous length"))?;
                let repeat = bits.read_bits(2)? + 3;
                for _ in 0..repeat {
                    lengths.push(prev);
                }
            }
            17 => {
                let repeat = bits.read_bits(3)? + 3;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            18 => {
                let repeat = bits.read_bits(7)? + 11;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            _ => return cl_table.raise(ErrorKind::MalformedBlock, "invalid code-length symbol"),
        }
    }
    if lengths.len() != total {
        return cl_table.raise(ErrorKind::MalformedBlock, "code-length run overshot HLIT+HDIST");
    }

    let lit_table = HuffmanTable::build(&lengths[..hlit], 15, true)?;
    let dist_table = HuffmanTable::build(&lengths[hlit..], 15, true)?;
    Ok((lit_table, dist_table))
}

fn decode_block(bits: &mut BitStream, lit: &HuffmanTable, dist: &HuffmanTable, out: &mut Output) -> Res<()> {
    loop {
        let sym = lit.decode(bits)?;
        match sym {
            0..=255 => out.push(sym as u8)?,
            256 => return Ok(()),
            257..=285 => {
                let (base, extra) = LENGTH_TABLE[sym as usize - 257];
                let length = base + bits.read_bits(extra)?;
                let dist_sym = dist.decode(bits)?;
                if dist_sym as usize >= DISTANCE_TABLE.len() {
                    return dist.raise(ErrorKind::MalformedBlock, "distance symbol out of range");
                }
                let (dbase, dextra) = DISTANCE_TABLE[dist_sym as usize];
                let distance = dbase + bits.read_bits(dextra)?;
                out.copy_back(distance as usize, length as usize)?;
            }
            _ => return lit.raise(ErrorKind::MalformedBlock, "reserved literal/length symbol"),
        }
    }
}

/// Decoder for a raw RFC 1951 DEFLATE stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeflateCodec;

impl DeflateCodec {
    pub fn new() -> Self {
        DeflateCodec
    }

    /// Inflates `compressed` into `uncompressed`, returning the number of
    /// bytes written.
    pub fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        let mut bits = BitStream::new(compressed, ByteOrder::BackToFront);
        let mut out = Output::new(uncompressed);

        loop {
            let bfinal = bits.read_bits(1)?;
            let btype = bits.read_bits(2)?;
            log::trace!("deflate block bfinal={bfinal} btype={btype}");
            match btype {
                0 => {
                    bits.align_to_byte();
                    let len = bits.read_bits(16)? as u16;
                    let nlen = bits.read_bits(16)? as u16;
                    if len != !nlen {
                        return bits.raise(ErrorKind::MalformedBlock, "LEN/NLEN mismatch");
                    }
                    for _ in 0..len {
                        let byte = bits.read_bits(8)? as u8;
                        out.push(byte)?;
                    }
                }
                1 => {
                    let lit = HuffmanTable::build(&fixed_literal_lengths(), 15, true)?;
                    let dist = HuffmanTable::build(&fixed_distance_lengths(), 15, true)?;
                    decode_block(&mut bits, &lit, &dist, &mut out)?;
                }
                2 => {
                    let (lit, dist) = read_dynamic_tables(&mut bits)?;
                    decode_block(&mut bits, &lit, &dist, &mut out)?;
                }
                _ => return bits.raise(ErrorKind::MalformedBlock, "reserved BTYPE 11"),
            }
            if bfinal == 1 {
                break;
            }
        }
        log::debug!("deflate produced {} bytes", out.len);
        Ok(out.len)
    }

    /// Decodes a zlib-wrapped (RFC 1950) DEFLATE stream: validates the
    /// CMF/FLG header, inflates the payload, then checks the trailing
    /// big-endian Adler-32 against the decoded output.
    pub fn decompress_zlib(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        let header = compressed.range(0, 2)?;
        let cmf = header[0];
        let flg = header[1];
        self.assert_eq(cmf & 0x0F, 8, ErrorKind::UnsupportedFormat)?;
        self.assert_eq(
            ((cmf as u16) * 256 + flg as u16) % 31,
            0,
            ErrorKind::MalformedBlock,
        )?;
        self.assert(flg & 0x20 == 0, ErrorKind::UnsupportedFormat, "preset dictionary not supported")?;
        self.assert_le(6, compressed.len(), ErrorKind::Truncated)?;

        let trailer = compressed.range(compressed.len() - 4, 4)?;
        let expected_adler = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

        let payload = &compressed[2..compressed.len() - 4];
        let written = self.decompress(payload, uncompressed)?;

        let actual_adler = adler32(&uncompressed[..written]);
        if actual_adler != expected_adler {
            return self.raise(ErrorKind::ChecksumMismatch, format!("adler32 {actual_adler:#010x} != {expected_adler:#010x}"));
        }
        Ok(written)
    }
}

impl ErrorContext for DeflateCodec {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn fixed_block_decodes_abc() {
        // 78 9C 4B 4C 4A 06 00 02 4D 01 27 — zlib("abc")
        let compressed = [0x78, 0x9C, 0x4B, 0x4C, 0x4A, 0x06, 0x00, 0x02, 0x4D, 0x01, 0x27];
        let mut out = [0u8; 3];
        let codec = DeflateCodec::new();
        let n = codec.decompress_zlib(&compressed, &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out, b"abc");
    }

    #[test_log::test]
    fn stored_block_round_trips() {
        // BFINAL=1, BTYPE=00, then byte-aligned LEN=3 NLEN=~3, "xyz"
        let mut bits = Vec::new();
        bits.push(0b0000_0001u8); // bfinal=1, btype=00, rest padding
        bits.push(3);
        bits.push(0);
        bits.push(!3u8);
        bits.push(!0u8);
        bits.extend_from_slice(b"xyz");
        let mut out = [0u8; 3];
        let n = DeflateCodec::new().decompress(&bits, &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out, b"xyz");
    }

    #[test_log::test]
    fn reserved_block_type_is_rejected() {
        let bits = [0b0000_0111u8]; // bfinal=1, btype=11
        let mut out = [0u8; 1];
        assert!(DeflateCodec::new().decompress(&bits, &mut out).is_err());
    }

    #[test_log::test]
    fn checksum_mismatch_is_reported() {
        let compressed = [0x78, 0x9C, 0x4B, 0x4C, 0x4A, 0x06, 0x00, 0x02, 0x4D, 0x01, 0x00];
        let mut out = [0u8; 3];
        let err = DeflateCodec::new().decompress_zlib(&compressed, &mut out).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChecksumMismatch);
    }

    #[test_log::test]
    fn zlib_header_with_no_room_for_trailer_is_truncated() {
        let compressed = [0x78, 0x9C];
        let mut out = [0u8; 3];
        let err = DeflateCodec::new().decompress_zlib(&compressed, &mut out).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Truncated);
    }
}
