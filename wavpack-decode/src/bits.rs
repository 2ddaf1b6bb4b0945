// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bit-level reading of the audio bitstream sub-block.
//!
//! [`BitstreamState`] holds the bytes of the current block's bitstream sub-block along with the
//! number of bits consumed so far, so decoding may stop and resume across calls. Each decode call
//! reads through a [`BitstreamReader`], a [`BitReaderRtl`] positioned at the saved offset. Bits
//! are consumed least-significant bit first.

use log::trace;
use symphonia_core::io::{BitReaderRtl, ReadBitsRtl, ReadBytes};

/// Bytes of set bits appended after the bitstream.
const SENTINEL_LEN: usize = 8;

/// Largest single read made from the source while loading the bitstream.
const READ_CHUNK_LEN: usize = 4096;

/// Persistent state of the audio bitstream reader.
#[derive(Default)]
pub struct BitstreamState {
    /// The bitstream followed by `SENTINEL_LEN` bytes of `0xff`.
    buf: Vec<u8>,
    /// Number of bits in `buf` that were read from the source.
    len_bits: u64,
    /// Number of bits consumed.
    pos: u64,
    is_open: bool,
    error: bool,
}

impl BitstreamState {
    /// Opens the reader over the next `len` bytes of `src`. If the source ends or fails early,
    /// the bitstream is shortened to the bytes that could be read.
    pub fn open<B: ReadBytes>(&mut self, src: &mut B, len: u64) {
        self.buf.clear();
        self.pos = 0;
        self.is_open = true;
        self.error = false;

        let mut left = len;

        while left > 0 {
            let start = self.buf.len();
            let want = left.min(READ_CHUNK_LEN as u64) as usize;

            self.buf.resize(start + want, 0);

            match src.read_buf(&mut self.buf[start..]) {
                Ok(read) if read > 0 => {
                    self.buf.truncate(start + read);
                    left -= read as u64;
                }
                Ok(_) => {
                    trace!("bitstream: source ended with {} bytes outstanding", left);
                    self.buf.truncate(start);
                    break;
                }
                Err(err) => {
                    trace!("bitstream: read failed with {} bytes outstanding: {}", left, err);
                    self.buf.truncate(start);
                    break;
                }
            }
        }

        self.len_bits = 8 * self.buf.len() as u64;

        // Past the end every byte reads as 0xff so the entropy decoder terminates.
        self.buf.extend_from_slice(&[0xff; SENTINEL_LEN]);
    }

    /// Closes the reader and releases the bitstream.
    pub fn close(&mut self) {
        self.is_open = false;
        self.buf.clear();
        self.len_bits = 0;
        self.pos = 0;
    }

    /// Returns true if the reader has been opened since the last `close`.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Returns true if the reader ran past the end of its bytes.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Gets a reader that continues from the current position.
    pub fn reader(&mut self) -> BitstreamReader<'_> {
        let start = ((self.pos >> 3) as usize).min(self.buf.len());

        let mut bits = BitReaderRtl::new(&self.buf[start..]);

        if bits.ignore_bits((self.pos & 0x7) as u32).is_err() {
            self.error = true;
        }

        BitstreamReader {
            bits,
            pos: &mut self.pos,
            len_bits: self.len_bits,
            error: &mut self.error,
        }
    }
}

/// `BitstreamReader` reads bits least-significant bit first from the audio bitstream.
///
/// Reads never fail. Past the end of the bitstream every bit reads as 1 and the error flag of the
/// underlying [`BitstreamState`] is raised.
pub struct BitstreamReader<'a> {
    bits: BitReaderRtl<'a>,
    pos: &'a mut u64,
    len_bits: u64,
    error: &'a mut bool,
}

impl BitstreamReader<'_> {
    #[inline(always)]
    fn advance(&mut self, num: u32) {
        *self.pos += u64::from(num);

        if *self.pos > self.len_bits {
            *self.error = true;
        }
    }

    /// Reads a single bit.
    #[inline(always)]
    pub fn read_bit(&mut self) -> u32 {
        let bit = self.bits.read_bit().unwrap_or(1);
        self.advance(1);
        u32::from(bit)
    }

    /// Reads up-to 32 bits. The first bit read is the least-significant bit of the result.
    #[inline(always)]
    pub fn read_bits_leq32(&mut self, bit_width: u32) -> u32 {
        debug_assert!(bit_width <= 32);

        let value = match self.bits.read_bits_leq32(bit_width) {
            Ok(value) => value,
            Err(_) => ((1u64 << bit_width) - 1) as u32,
        };

        self.advance(bit_width);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::BitstreamState;
    use symphonia_core::io::{BufReader, FiniteStream};

    fn open_state(data: &[u8], len: u64) -> BitstreamState {
        let mut src = BufReader::new(data);
        let mut state = BitstreamState::default();
        state.open(&mut src, len);
        state
    }

    #[test]
    fn verify_read_bit() {
        let mut state = open_state(&[0b1010_0101u8, 0b0000_0001], 2);

        let mut bs = state.reader();
        let bits: Vec<u32> = (0..9).map(|_| bs.read_bit()).collect();
        assert_eq!(bits, vec![1, 0, 1, 0, 0, 1, 0, 1, 1]);

        assert!(!state.is_error());
    }

    #[test]
    fn verify_read_bits_leq32() {
        let mut state = open_state(&[0x78, 0x56, 0x34, 0x12, 0xff], 5);

        let mut bs = state.reader();
        assert_eq!(bs.read_bits_leq32(0), 0);
        assert_eq!(bs.read_bits_leq32(4), 0x8);
        assert_eq!(bs.read_bits_leq32(32), 0xf1234567);
        assert_eq!(bs.read_bits_leq32(4), 0xf);
    }

    #[test]
    fn verify_resume_mid_byte() {
        let mut state = open_state(&[0b0000_0111u8, 0xaa], 2);

        assert_eq!(state.reader().read_bits_leq32(4), 0b0111);
        assert_eq!(state.reader().read_bits_leq32(12), 0xaa0);
        assert!(!state.is_error());
    }

    #[test]
    fn verify_sentinel_past_end() {
        let data = [0x00u8, 0x00, 0x55];
        let mut src = BufReader::new(&data);
        let mut state = BitstreamState::default();
        // Only the first two bytes belong to the bitstream.
        state.open(&mut src, 2);

        assert_eq!(src.bytes_available(), 1);

        {
            let mut bs = state.reader();
            assert_eq!(bs.read_bits_leq32(16), 0);
        }
        assert!(!state.is_error());

        {
            let mut bs = state.reader();
            assert_eq!(bs.read_bits_leq32(32), 0xffff_ffff);
            assert_eq!(bs.read_bit(), 1);
        }
        assert!(state.is_error());
    }

    #[test]
    fn verify_exhausted_sentinel_reads_ones() {
        let mut state = open_state(&[], 0);

        let mut bs = state.reader();
        assert_eq!(bs.read_bits_leq32(32), 0xffff_ffff);
        assert_eq!(bs.read_bits_leq32(32), 0xffff_ffff);
        assert_eq!(bs.read_bits_leq32(32), 0xffff_ffff);
        assert_eq!(bs.read_bit(), 1);

        assert!(state.is_error());
        assert_eq!(state.reader().read_bits_leq32(7), 0x7f);
    }

    #[test]
    fn verify_short_source_raises_error() {
        let mut state = open_state(&[0x01u8], 4);

        {
            let mut bs = state.reader();
            assert_eq!(bs.read_bits_leq32(8), 1);
            assert_eq!(bs.read_bits_leq32(8), 0xff);
        }

        assert!(state.is_error());
    }

    #[test]
    fn verify_close_releases_bitstream() {
        let mut state = open_state(&[0x00u8], 1);
        assert!(state.is_open());

        state.close();
        assert!(!state.is_open());
        assert_eq!(state.reader().read_bits_leq32(8), 0xff);
    }
}
