//! LZFSE: the framed FSE/tANS codec with literal and (L,M,D) tuple streams,
//! plus raw/uncompressed and embedded-LZVN blocks under the same framing.
//!
//! A stream is a sequence of blocks, each opening with a 4-byte ASCII-ish
//! marker and a 4-byte little-endian uncompressed size: `bvx-` (raw),
//! `bvxn` (embedded [`crate::lzvn::LzvnCodec`] block), `bvx1`/`bvx2`
//! (FSE-compressed, with an uncompressed or bit-packed frequency table
//! respectively), and `bvx$` (end of stream, no body).

mod tables;

use crate::bitstream::{BitStream, ByteOrder, ReverseBitStream};
use crate::error::{CheckedSlice, ErrorContext, ErrorKind, Res};
use crate::lzvn::LzvnCodec;
use tables::{
    D_SYMBOLS, D_TABLE, FREQ_CODE_TABLE, LITERAL_STATES, LITERAL_SYMBOLS, L_BASE, L_EXTRA_BITS,
    L_SYMBOLS, M_BASE, M_EXTRA_BITS, M_STATES, M_SYMBOLS,
};

const MARKER_EOS: [u8; 4] = *b"bvx$";
const MARKER_RAW: [u8; 4] = *b"bvx-";
const MARKER_LZVN: [u8; 4] = *b"bvxn";
const MARKER_V1: [u8; 4] = *b"bvx1";
const MARKER_V2: [u8; 4] = *b"bvx2";

const N_FREQ: usize = L_SYMBOLS + M_SYMBOLS + D_SYMBOLS + LITERAL_SYMBOLS;

/// A basic FSE decoder table entry: which symbol a state decodes to, how
/// many bits to read on this step (`k`), and the additive term used to
/// compute the next state.
#[derive(Clone, Copy)]
struct FseEntry {
    symbol: u16,
    k: u8,
    delta: i32,
}

/// A value-decoder table entry (L, M, D): an [`FseEntry`] fused with the
/// alphabet's extra-bits width and base, so one bit read recovers both the
/// decoded value and the next FSE state in a single step.
#[derive(Clone, Copy)]
struct ValueEntry {
    nbits: u8,
    delta: i32,
    value_bits: u8,
    value_base: u32,
}

/// Builds the canonical FSE decoder table for one alphabet: `freq[s]` is the
/// normalized frequency of symbol `s`, and `Σ freq == nstates`.
fn build_fse_entries(nstates: usize, freq: &[u32]) -> Res<Vec<FseEntry>> {
    let sum: u32 = freq.iter().sum();
    if sum as usize != nstates {
        return Err(crate::error::Error::new(ErrorKind::MalformedBlock)
            .with_message(format!("fse frequencies sum to {sum}, expected {nstates}")));
    }
    let states_clz = (nstates as u32).leading_zeros();
    let mut table = vec![
        FseEntry {
            symbol: 0,
            k: 0,
            delta: 0
        };
        nstates
    ];
    let mut cursor = 0usize;
    for (symbol, &f) in freq.iter().enumerate() {
        if f == 0 {
            continue;
        }
        let k = f.leading_zeros() - states_clz;
        let base_weight = ((2 * nstates as u32) >> k) - f;
        for w in 0..f {
            let entry = if w < base_weight {
                FseEntry {
                    symbol: symbol as u16,
                    k: k as u8,
                    delta: (((f + w) << k) as i64 - nstates as i64) as i32,
                }
            } else {
                FseEntry {
                    symbol: symbol as u16,
                    k: (k - 1) as u8,
                    delta: (((w - base_weight) << (k - 1)) as i64) as i32,
                }
            };
            table[cursor + w as usize] = entry;
        }
        cursor += f as usize;
    }
    Ok(table)
}

fn build_value_entries(nstates: usize, freq: &[u32], base: &[u32], extra_bits: &[u8]) -> Res<Vec<ValueEntry>> {
    let entries = build_fse_entries(nstates, freq)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            let vb = extra_bits[e.symbol as usize];
            ValueEntry {
                nbits: e.k + vb,
                delta: e.delta,
                value_bits: vb,
                value_base: base[e.symbol as usize],
            }
        })
        .collect())
}

#[track_caller]
fn decode_literal(table: &[FseEntry], state: &mut u32, reader: &mut ReverseBitStream) -> Res<u8> {
    let entry = table.get(*state as usize).ok_or_else(|| {
        crate::error::Error::new(ErrorKind::MalformedBlock).with_message("literal fse state out of range")
    })?;
    let v = reader.read_bits(entry.k as u32)?;
    let new_state = entry.delta + v as i32;
    reader.assert(
        new_state >= 0 && (new_state as usize) < table.len(),
        ErrorKind::MalformedBlock,
        "literal fse state transitioned out of range",
    )?;
    *state = new_state as u32;
    Ok(entry.symbol as u8)
}

#[track_caller]
fn decode_value(table: &[ValueEntry], state: &mut u32, reader: &mut ReverseBitStream) -> Res<u32> {
    let entry = table.get(*state as usize).ok_or_else(|| {
        crate::error::Error::new(ErrorKind::MalformedBlock).with_message("value fse state out of range")
    })?;
    let v = reader.read_bits(entry.nbits as u32)?;
    let mask = if entry.value_bits == 0 { 0 } else { (1u32 << entry.value_bits) - 1 };
    let value = entry.value_base + (v & mask);
    let new_state = entry.delta + (v >> entry.value_bits) as i32;
    reader.assert(
        new_state >= 0 && (new_state as usize) < table.len(),
        ErrorKind::MalformedBlock,
        "value fse state transitioned out of range",
    )?;
    *state = new_state as u32;
    Ok(value)
}

/// Reads one bit-packed frequency value from a v2 header's excess bytes,
/// per the 32-entry lookup in [`tables::FREQ_CODE_TABLE`].
fn read_packed_weight(bits: &mut BitStream) -> Res<u32> {
    let peek = bits.peek_bits(5)? as u8;
    let (width, partial) = FREQ_CODE_TABLE[peek as usize];
    if width <= 5 {
        bits.consume(width as u32);
        Ok(partial)
    } else {
        bits.consume(5);
        let extra = bits.read_bits((width - 5) as u32)?;
        Ok(partial + extra)
    }
}

struct TupleState {
    n_literals: u32,
    n_lmd: u32,
    literal_bits: i32,
    literal_state: [u16; 4],
    lmd_bits: i32,
    l_state: u16,
    m_state: u16,
    d_state: u16,
    freq: [u32; N_FREQ],
}

fn read_u32_le(buf: &[u8], pos: &mut usize) -> Res<u32> {
    let b = buf.range(*pos, 4)?;
    *pos += 4;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u16_le(buf: &[u8], pos: &mut usize) -> Res<u16> {
    let b = buf.range(*pos, 2)?;
    *pos += 2;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u64_le(buf: &[u8], pos: &mut usize) -> Res<u64> {
    let b = buf.range(*pos, 8)?;
    *pos += 8;
    Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Decoder for a framed LZFSE (`bvx*`) stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LzfseCodec;

impl ErrorContext for LzfseCodec {}

impl LzfseCodec {
    pub fn new() -> Self {
        LzfseCodec
    }

    pub fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        let mut pos = 0usize;
        let mut out_len = 0usize;
        loop {
            let marker: [u8; 4] = compressed.range(pos, 4)?.try_into().unwrap();
            pos += 4;
            if marker == MARKER_EOS {
                break;
            }
            let raw_size = read_u32_le(compressed, &mut pos)? as usize;
            self.assert_le(out_len + raw_size, uncompressed.len(), ErrorKind::CapacityExceeded)?;
            let dst = &mut uncompressed[out_len..out_len + raw_size];

            let written = match marker {
                MARKER_RAW => {
                    let body = compressed.range(pos, raw_size)?;
                    pos += raw_size;
                    dst.copy_from_slice(body);
                    raw_size
                }
                MARKER_LZVN => {
                    let compressed_size = read_u32_le(compressed, &mut pos)? as usize;
                    let body = compressed.range(pos, compressed_size)?;
                    pos += compressed_size;
                    LzvnCodec::new().decompress(body, dst)?
                }
                MARKER_V1 => self.decode_compressed_v1(compressed, &mut pos, dst)?,
                MARKER_V2 => self.decode_compressed_v2(compressed, &mut pos, dst)?,
                _ => {
                    return self.raise(
                        ErrorKind::UnsupportedFormat,
                        format!("unknown lzfse block marker {:?}", marker),
                    )
                }
            };
            out_len += written;
            log::trace!("lzfse block {:?} produced {written} bytes", marker);
        }
        log::debug!("lzfse stream produced {out_len} bytes");
        Ok(out_len)
    }

    fn decode_compressed_v1(&self, compressed: &[u8], pos: &mut usize, dst: &mut [u8]) -> Res<usize> {
        let _compressed_block_size = read_u32_le(compressed, pos)?;
        let n_literals = read_u32_le(compressed, pos)?;
        let n_lmd = read_u32_le(compressed, pos)?;
        let literals_payload_size = read_u32_le(compressed, pos)?;
        let lmd_payload_size = read_u32_le(compressed, pos)?;
        let literal_bits = read_u32_le(compressed, pos)? as i32;
        let mut literal_state = [0u16; 4];
        for s in literal_state.iter_mut() {
            *s = read_u16_le(compressed, pos)?;
        }
        let lmd_bits = read_u32_le(compressed, pos)? as i32;
        let l_state = read_u16_le(compressed, pos)?;
        let m_state = read_u16_le(compressed, pos)?;
        let d_state = read_u16_le(compressed, pos)?;

        let mut freq = [0u32; N_FREQ];
        for f in freq.iter_mut() {
            *f = read_u16_le(compressed, pos)? as u32;
        }

        let state = TupleState {
            n_literals,
            n_lmd,
            literal_bits,
            literal_state,
            lmd_bits,
            l_state,
            m_state,
            d_state,
            freq,
        };

        let literals_payload = compressed.range(*pos, literals_payload_size as usize)?;
        *pos += literals_payload_size as usize;
        let lmd_payload = compressed.range(*pos, lmd_payload_size as usize)?;
        *pos += lmd_payload_size as usize;

        self.decode_tuples(&state, literals_payload, lmd_payload, dst)
    }

    fn decode_compressed_v2(&self, compressed: &[u8], pos: &mut usize, dst: &mut [u8]) -> Res<usize> {
        let header_start = *pos - 8; // marker + raw size already consumed
        let w0 = read_u64_le(compressed, pos)?;
        let w1 = read_u64_le(compressed, pos)?;
        let w2 = read_u64_le(compressed, pos)?;

        let n_literals = (w0 & 0xF_FFFF) as u32;
        let literals_payload_size = ((w0 >> 20) & 0xF_FFFF) as u32;
        let n_lmd = ((w0 >> 40) & 0xF_FFFF) as u32;
        let literal_bits = (((w0 >> 60) & 0x7) as i32) - 7;

        let mut literal_state = [0u16; 4];
        for (i, s) in literal_state.iter_mut().enumerate() {
            *s = (((w1 >> (10 * i)) & 0x3FF) as u16) as u16;
        }
        let lmd_payload_size = ((w1 >> 40) & 0xF_FFFF) as u32;
        let lmd_bits = (((w1 >> 60) & 0x7) as i32) - 7;

        let header_size = (w2 & 0xFFFF_FFFF) as u32;
        let l_state = ((w2 >> 32) & 0x3FF) as u16;
        let m_state = ((w2 >> 42) & 0x3FF) as u16;
        let d_state = ((w2 >> 52) & 0x3FF) as u16;

        self.assert_le(32, header_size as usize, ErrorKind::MalformedBlock)?;
        let freq_bytes_len = header_size as usize - 32;
        let freq_bytes = compressed.range(header_start + 32, freq_bytes_len)?;
        *pos = header_start + header_size as usize;

        let mut freq_bits = BitStream::new(freq_bytes, ByteOrder::FrontToBack);
        let mut freq = [0u32; N_FREQ];
        for f in freq.iter_mut() {
            *f = read_packed_weight(&mut freq_bits)?;
        }

        let state = TupleState {
            n_literals,
            n_lmd,
            literal_bits,
            literal_state,
            lmd_bits,
            l_state,
            m_state,
            d_state,
            freq,
        };

        let literals_payload = compressed.range(*pos, literals_payload_size as usize)?;
        *pos += literals_payload_size as usize;
        let lmd_payload = compressed.range(*pos, lmd_payload_size as usize)?;
        *pos += lmd_payload_size as usize;

        self.decode_tuples(&state, literals_payload, lmd_payload, dst)
    }

    /// Shared tail of both header variants: builds the FSE tables, decodes
    /// the literal stream and the (L,M,D) tuple stream, and replays them
    /// into `dst`.
    fn decode_tuples(&self, state: &TupleState, literals_payload: &[u8], lmd_payload: &[u8], dst: &mut [u8]) -> Res<usize> {
        let l_freq = &state.freq[0..L_SYMBOLS];
        let m_freq = &state.freq[L_SYMBOLS..L_SYMBOLS + M_SYMBOLS];
        let d_freq = &state.freq[L_SYMBOLS + M_SYMBOLS..L_SYMBOLS + M_SYMBOLS + D_SYMBOLS];
        let literal_freq = &state.freq[L_SYMBOLS + M_SYMBOLS + D_SYMBOLS..];

        let literal_table = build_fse_entries(LITERAL_STATES, literal_freq)?;
        let l_table = build_value_entries(tables::L_STATES, l_freq, &L_BASE, &L_EXTRA_BITS)?;
        let m_table = build_value_entries(M_STATES, m_freq, &M_BASE, &M_EXTRA_BITS)?;
        let (d_base, d_bits) = D_TABLE;
        let d_table = build_value_entries(tables::D_STATES, d_freq, &d_base, &d_bits)?;

        let mut literal_values = vec![0u8; state.n_literals as usize];
        let mut lreader = ReverseBitStream::new_reverse(literals_payload);
        lreader.prime((-state.literal_bits) as u32)?;
        let mut lstates = state.literal_state.map(|s| s as u32);
        let mut i = 0usize;
        while i < literal_values.len() {
            for k in 0..4 {
                if i + k >= literal_values.len() {
                    break;
                }
                literal_values[i + k] = decode_literal(&literal_table, &mut lstates[k], &mut lreader)?;
            }
            i += 4;
        }

        let mut mreader = ReverseBitStream::new_reverse(lmd_payload);
        mreader.prime((-state.lmd_bits) as u32)?;
        let mut l_state = state.l_state as u32;
        let mut m_state = state.m_state as u32;
        let mut d_state = state.d_state as u32;
        let mut prev_distance: u32 = 0;

        let mut out_len = 0usize;
        let mut literal_cursor = 0usize;
        for _ in 0..state.n_lmd {
            let l = decode_value(&l_table, &mut l_state, &mut mreader)?;
            let m = decode_value(&m_table, &mut m_state, &mut mreader)?;
            let d = decode_value(&d_table, &mut d_state, &mut mreader)?;
            let distance = if d == 0 { prev_distance } else { d };
            prev_distance = distance;

            let lit_end = literal_cursor + l as usize;
            self.assert_le(lit_end, literal_values.len(), ErrorKind::Truncated)?;
            self.assert_le(out_len + l as usize, dst.len(), ErrorKind::CapacityExceeded)?;
            dst[out_len..out_len + l as usize].copy_from_slice(&literal_values[literal_cursor..lit_end]);
            out_len += l as usize;
            literal_cursor = lit_end;

            if m > 0 {
                self.assert(distance > 0 && distance as usize <= out_len, ErrorKind::DistanceOutOfRange, "lmd distance out of range")?;
                self.assert_le(out_len + m as usize, dst.len(), ErrorKind::CapacityExceeded)?;
                for _ in 0..m {
                    let byte = dst[out_len - distance as usize];
                    dst[out_len] = byte;
                    out_len += 1;
                }
            }
        }

        // any literals beyond the last tuple's consumption are copied verbatim
        if literal_cursor < literal_values.len() {
            let remaining = literal_values.len() - literal_cursor;
            self.assert_le(out_len + remaining, dst.len(), ErrorKind::CapacityExceeded)?;
            dst[out_len..out_len + remaining].copy_from_slice(&literal_values[literal_cursor..]);
            out_len += remaining;
        }

        Ok(out_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn raw_block_round_trips() {
        let mut compressed = Vec::new();
        compressed.extend_from_slice(&MARKER_RAW);
        compressed.extend_from_slice(&5u32.to_le_bytes());
        compressed.extend_from_slice(b"hello");
        compressed.extend_from_slice(&MARKER_EOS);

        let mut out = [0u8; 5];
        let n = LzfseCodec::new().decompress(&compressed, &mut out).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out, b"hello");
    }

    #[test_log::test]
    fn embedded_lzvn_block_round_trips() {
        let lzvn_body = [0xE1u8, b'h', 0x06];
        let mut compressed = Vec::new();
        compressed.extend_from_slice(&MARKER_LZVN);
        compressed.extend_from_slice(&1u32.to_le_bytes());
        compressed.extend_from_slice(&(lzvn_body.len() as u32).to_le_bytes());
        compressed.extend_from_slice(&lzvn_body);
        compressed.extend_from_slice(&MARKER_EOS);

        let mut out = [0u8; 1];
        let n = LzfseCodec::new().decompress(&compressed, &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(&out, b"h");
    }

    #[test_log::test]
    fn unknown_marker_is_rejected() {
        let mut compressed = Vec::new();
        compressed.extend_from_slice(b"bvxZ");
        compressed.extend_from_slice(&0u32.to_le_bytes());
        let mut out = [0u8; 1];
        assert!(LzfseCodec::new().decompress(&compressed, &mut out).is_err());
    }

    #[test_log::test]
    fn single_symbol_fse_table_is_self_consistent() {
        let mut freq = [0u32; 256];
        freq[b'x' as usize] = LITERAL_STATES as u32;
        let table = build_fse_entries(LITERAL_STATES, &freq).unwrap();
        assert_eq!(table.len(), LITERAL_STATES);
        assert!(table.iter().all(|e| e.symbol == b'x' as u16 && e.k == 0));
    }
}
