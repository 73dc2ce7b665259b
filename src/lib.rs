#![warn(clippy::indexing_slicing, clippy::unwrap_used, clippy::panic)]
//! Stream decoders for heterogeneous byte-oriented compression formats found
//! in forensic and operating-system artifacts: DEFLATE, BZIP2, LZVN, LZFSE,
//! the ASCII-7 expander, Apple's ADC, and typed stand-ins for LZXPRESS,
//! LZNT1 and LZX.
//!
//! Every codec is single-shot: a whole compressed buffer goes in, a whole
//! uncompressed buffer comes out, nothing is retained across calls. None of
//! them touch the filesystem, a CLI, or platform codecs — that plumbing is
//! an external collaborator's job, not this crate's.

pub mod bitstream;
pub mod bzip2;
pub mod checksum;
pub mod deflate;
pub mod error;
pub mod huffman;
pub mod lzfse;
pub mod lzvn;
pub mod misc;

pub use error::{Error, ErrorKind, Res};

/// Common entry point implemented by every codec in this crate: decode
/// `compressed` into `uncompressed`, returning the number of bytes written.
///
/// `uncompressed`'s length is the caller's declared output capacity; bytes
/// beyond the returned count are unspecified. On error, the partial content
/// of `uncompressed` must not be consumed by the caller.
pub trait Decoder {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize>;
}

impl Decoder for deflate::DeflateCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for bzip2::BZipCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for lzvn::LzvnCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for lzfse::LzfseCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for misc::Ascii7Codec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for misc::AdcCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for misc::LzxpressCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for misc::Lznt1Codec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

impl Decoder for misc::LzxCodec {
    fn decompress(&self, compressed: &[u8], uncompressed: &mut [u8]) -> Res<usize> {
        self.decompress(compressed, uncompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn decoder_trait_dispatches_to_the_same_codec() {
        let codecs: Vec<Box<dyn Decoder>> = vec![
            Box::new(deflate::DeflateCodec::new()),
            Box::new(bzip2::BZipCodec::new()),
            Box::new(lzvn::LzvnCodec::new()),
            Box::new(lzfse::LzfseCodec::new()),
            Box::new(misc::Ascii7Codec::new()),
        ];
        // every one of these codecs reads at least one header field before
        // producing anything, so an empty input is always a Truncated or
        // InvalidArgument error rather than a silent empty success.
        for codec in &codecs {
            let mut out = [0u8; 4];
            assert!(codec.decompress(&[], &mut out).is_err());
        }

        // an empty ADC input is well-formed (an empty opcode stream) and
        // legitimately decodes to zero bytes.
        let mut out = [0u8; 4];
        assert_eq!(misc::AdcCodec::new().decompress(&[], &mut out).unwrap(), 0);
    }
}
