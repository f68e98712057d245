//! Bounded request-body decompression.
//!
//! Decompression is explicit — nothing is decoded automatically during
//! parsing — and fails closed: decoded output is never allowed to exceed
//! the configured bound, defending against decompression-bomb
//! amplification. On any failure the compressed input is left untouched.

use std::io::Read;

use flate2::read::{MultiGzDecoder, ZlibDecoder};

/// Outcome of a body decompression request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressStatus {
    /// Decoded output would exceed the configured bound.
    TooLarge,
    /// The input is not valid for the negotiated coding.
    DecompressError,
    /// No decoder is available for the negotiated coding.
    NotSupported,
    /// Decompression succeeded.
    Ok,
}

/// Internal decode result carrying the output on success.
pub(crate) enum Decoded {
    Ok(Vec<u8>),
    TooLarge,
    Malformed,
    NotSupported,
    /// Identity / absent coding — nothing to do.
    Identity,
}

impl Decoded {
    pub(crate) fn status(&self) -> DecompressStatus {
        match self {
            Self::Ok(_) | Self::Identity => DecompressStatus::Ok,
            Self::TooLarge => DecompressStatus::TooLarge,
            Self::Malformed => DecompressStatus::DecompressError,
            Self::NotSupported => DecompressStatus::NotSupported,
        }
    }
}

/// Decode `input` according to a `Content-Encoding` value.
///
/// `gzip`/`x-gzip` and `deflate` are supported; an absent or `identity`
/// coding is a successful no-op; everything else (including `br`) reports
/// that no decoder is available.
pub(crate) fn decode(encoding: &str, input: &[u8], limit: usize) -> Decoded {
    let coding = encoding.trim();
    if coding.is_empty() || coding.eq_ignore_ascii_case("identity") {
        return Decoded::Identity;
    }
    if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
        return run_bounded(MultiGzDecoder::new(input), limit);
    }
    if coding.eq_ignore_ascii_case("deflate") {
        return run_bounded(ZlibDecoder::new(input), limit);
    }
    Decoded::NotSupported
}

/// Drive a decoder, refusing to produce more than `limit` output bytes.
///
/// Reads at most `limit + 1` bytes: seeing the extra byte proves the
/// decoded stream is over-budget without materializing it.
fn run_bounded<R: Read>(decoder: R, limit: usize) -> Decoded {
    let mut output = Vec::new();
    let mut bounded = decoder.take(limit as u64 + 1);
    match bounded.read_to_end(&mut output) {
        Ok(_) => {
            if output.len() > limit {
                Decoded::TooLarge
            } else {
                Decoded::Ok(output)
            }
        }
        Err(_) => Decoded::Malformed,
    }
}
