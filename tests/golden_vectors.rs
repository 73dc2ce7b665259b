//! The named wire-format vectors from the corpus's testable-properties
//! corpus: one test per concrete scenario, each a fixed byte-for-byte
//! compressed/uncompressed pair rather than a round-trip generated by this
//! crate itself (this crate only decodes).

use artifact_codecs::bitstream::{BitStream, ByteOrder};
use artifact_codecs::checksum::{adler32, crc32_bzip};
use artifact_codecs::deflate::DeflateCodec;
use artifact_codecs::error::ErrorKind;
use artifact_codecs::lzvn::LzvnCodec;
use artifact_codecs::misc::AdcCodec;

#[test_log::test]
fn lzvn_my_compressed_file() {
    let compressed = [
        0xE0, 0x03, 0x4D, 0x79, 0x20, 0x63, 0x6F, 0x6D, 0x70, 0x72, 0x65, 0x73, 0x73, 0x65, 0x64,
        0x20, 0x66, 0x69, 0x6C, 0x65, 0x0A, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let mut out = [0u8; 19];
    let n = LzvnCodec::new().decompress(&compressed, &mut out).unwrap();
    assert_eq!(n, 19);
    assert_eq!(&out, b"My compressed file\n");
}

#[test_log::test]
fn adc_round_trip() {
    let compressed = [0x83, 0xFE, 0xED, 0xFA, 0xCE, 0x00, 0x00, 0x40, 0x00, 0x06];
    let mut out = [0u8; 11];
    let n = AdcCodec::new().decompress(&compressed, &mut out).unwrap();
    assert_eq!(n, 11);
    assert_eq!(&out, &[0xFE, 0xED, 0xFA, 0xCE, 0xCE, 0xCE, 0xCE, 0xFE, 0xED, 0xFA, 0xCE]);
}

#[test_log::test]
fn bzip2_stream_header_and_first_block_signature() {
    // The specification's BZIP2 scenario gives only the leading 14 bytes of
    // its 125-byte vector verbatim (`42 5A 68 31 31 41 59 26 53 59 5A 55 C4
    // 1E`); the remaining block body isn't reproducible from the prose
    // alone, so this checks what is actually pinned down: the stream magic,
    // block-size level, block signature, and the stored per-block CRC the
    // corpus also states as a standalone fact (0x5A55C41E).
    let header: [u8; 14] = [
        0x42, 0x5A, 0x68, 0x31, 0x31, 0x41, 0x59, 0x26, 0x53, 0x59, 0x5A, 0x55, 0xC4, 0x1E,
    ];
    let mut bits = BitStream::new(&header, ByteOrder::FrontToBack);
    assert_eq!(bits.read_bits(24).unwrap(), 0x425A68); // "BZh"
    assert_eq!(bits.read_bits(8).unwrap(), b'1' as u32); // 900k block size
    let sig_hi = bits.read_bits(24).unwrap() as u64;
    let sig_lo = bits.read_bits(24).unwrap() as u64;
    assert_eq!((sig_hi << 24) | sig_lo, 0x3141_5926_5359);
    assert_eq!(bits.read_bits(32).unwrap(), 0x5A55_C41E);
}

#[test_log::test]
fn bzip_crc32_of_hello_world() {
    assert_eq!(crc32_bzip(b"Hello, world!"), 0x8E9A_7706);
}

#[test_log::test]
fn deflate_zlib_adler32_error_path() {
    // zlib("abc") with the trailing Adler-32 flipped by one bit.
    let compressed = [0x78, 0x9C, 0x4B, 0x4C, 0x4A, 0x06, 0x00, 0x02, 0x4D, 0x01, 0x26];
    let mut out = [0u8; 3];
    let err = DeflateCodec::new().decompress_zlib(&compressed, &mut out).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChecksumMismatch);
}

#[test_log::test]
fn deflate_fixed_block_abc() {
    let compressed = [0x78, 0x9C, 0x4B, 0x4C, 0x4A, 0x06, 0x00, 0x02, 0x4D, 0x01, 0x27];
    let mut out = [0u8; 3];
    let n = DeflateCodec::new().decompress_zlib(&compressed, &mut out).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&out, b"abc");
    assert_eq!(adler32(b"abc"), 0x024D_0127);
}
