// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block headers and the resynchronizing header scanner.

use std::io;

use log::debug;
use symphonia_core::io::ReadBytes;

use crate::errors::{corrupt_error, Result};

pub const STREAM_MARKER: [u8; 4] = *b"wvpk";

/// Oldest stream version the decoder understands.
pub const MIN_STREAM_VERS: u16 = 0x402;
/// Newest stream version the decoder understands.
pub const MAX_STREAM_VERS: u16 = 0x410;

/// Default limit on the number of bytes skipped while searching for a header.
pub const MAX_HEADER_SEARCH: usize = 1024 * 1024;

// Block header flags.
pub const BYTES_STORED: u32 = 3;
pub const MONO_FLAG: u32 = 4;
pub const HYBRID_FLAG: u32 = 8;
pub const JOINT_STEREO: u32 = 0x10;
pub const CROSS_DECORR: u32 = 0x20;
pub const HYBRID_SHAPE: u32 = 0x40;
pub const FLOAT_DATA: u32 = 0x80;
pub const INT32_DATA: u32 = 0x100;
pub const HYBRID_BITRATE: u32 = 0x200;
pub const HYBRID_BALANCE: u32 = 0x400;
pub const INITIAL_BLOCK: u32 = 0x800;
pub const FINAL_BLOCK: u32 = 0x1000;

pub const SHIFT_LSB: u32 = 13;
pub const SHIFT_MASK: u32 = 0x1f << SHIFT_LSB;

pub const MAG_LSB: u32 = 18;
pub const MAG_MASK: u32 = 0x1f << MAG_LSB;

pub const SRATE_LSB: u32 = 23;
pub const SRATE_MASK: u32 = 0xf << SRATE_LSB;

pub const FALSE_STEREO: u32 = 0x4000_0000;

/// Blocks with either flag carry a single channel of residuals.
pub const MONO_DATA: u32 = MONO_FLAG | FALSE_STEREO;

pub const SAMPLE_RATES: [u32; 15] = [
    6000, 8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000,
    192000,
];

/// The 32-byte descriptor at the start of every block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    /// Size of the block, excluding the marker and this field.
    pub ck_size: u32,
    pub version: u16,
    pub track_no: u8,
    pub index_no: u8,
    pub total_samples: u32,
    pub block_index: u32,
    pub block_samples: u32,
    pub flags: u32,
    pub crc: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 32;

    /// Decodes a header from a buffer already validated with `is_valid_header`.
    fn from_bytes(buf: &[u8; BlockHeader::SIZE]) -> Self {
        let u32_at =
            |pos: usize| u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);

        BlockHeader {
            ck_size: u32_at(4),
            version: u16::from_le_bytes([buf[8], buf[9]]),
            track_no: buf[10],
            index_no: buf[11],
            total_samples: u32_at(12),
            block_index: u32_at(16),
            block_samples: u32_at(20),
            flags: u32_at(24),
            crc: u32_at(28),
        }
    }

    /// Gets the total number of samples in the stream if it is known.
    pub fn total_samples(&self) -> Option<u32> {
        match self.total_samples {
            u32::MAX => None,
            total => Some(total),
        }
    }

    /// Gets the number of metadata bytes following the header.
    pub fn body_len(&self) -> u32 {
        (self.ck_size + 8).saturating_sub(BlockHeader::SIZE as u32)
    }

    pub fn bytes_per_sample(&self) -> u32 {
        (self.flags & BYTES_STORED) + 1
    }

    pub fn shift(&self) -> u32 {
        (self.flags & SHIFT_MASK) >> SHIFT_LSB
    }

    pub fn magnitude_bits(&self) -> u32 {
        (self.flags & MAG_MASK) >> MAG_LSB
    }

    /// Gets the sample rate encoded in the flags, or `None` for a non-standard rate.
    pub fn sample_rate(&self) -> Option<u32> {
        let index = ((self.flags & SRATE_MASK) >> SRATE_LSB) as usize;
        SAMPLE_RATES.get(index).copied()
    }

    /// Returns true if the block codes a single channel of residuals.
    pub fn is_mono_data(&self) -> bool {
        self.flags & MONO_DATA != 0
    }

    /// Gets the number of channels a block writes per sample.
    pub fn block_channels(&self) -> usize {
        if self.flags & MONO_FLAG != 0 {
            1
        }
        else {
            2
        }
    }

    pub fn is_initial_block(&self) -> bool {
        self.flags & INITIAL_BLOCK != 0
    }

    pub fn is_final_block(&self) -> bool {
        self.flags & FINAL_BLOCK != 0
    }
}

/// Checks the fixed fields of a candidate header.
fn is_valid_header(buf: &[u8; BlockHeader::SIZE]) -> bool {
    buf[0..4] == STREAM_MARKER
        && buf[4] & 1 == 0
        && buf[6] < 16
        && buf[7] == 0
        && buf[9] == 4
        && buf[8] >= (MIN_STREAM_VERS & 0xff) as u8
        && buf[8] <= (MAX_STREAM_VERS & 0xff) as u8
}

/// Checks everything but the version of a candidate header.
fn is_header_of_other_version(buf: &[u8; BlockHeader::SIZE]) -> bool {
    buf[0..4] == STREAM_MARKER && buf[4] & 1 == 0 && buf[6] < 16 && buf[7] == 0
}

/// Searches a byte stream for the next block header.
pub struct HeaderScanner {
    max_search: usize,
    rejected_version: Option<u16>,
}

impl HeaderScanner {
    pub fn new(max_search: usize) -> Self {
        HeaderScanner { max_search, rejected_version: None }
    }

    /// Gets the version of the last well-formed header that was skipped because its version is
    /// outside the supported range.
    pub fn rejected_version(&self) -> Option<u16> {
        self.rejected_version
    }

    /// Reads the next valid block header from `src`.
    ///
    /// On success the header and the number of bytes skipped to find it are returned. `None` is
    /// returned if the source ends first. Skipping `max_search` or more bytes is a
    /// `DecodeError`.
    pub fn next_header<B: ReadBytes>(
        &mut self,
        src: &mut B,
    ) -> Result<Option<(BlockHeader, usize)>> {
        let mut buf = [0u8; BlockHeader::SIZE];
        let mut kept = 0;
        let mut skipped = 0;

        loop {
            match src.read_buf_exact(&mut buf[kept..]) {
                Ok(()) => (),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err.into()),
            }

            if is_valid_header(&buf) {
                if skipped > 0 {
                    debug!("skipped {} bytes to next block header at {}", skipped, src.pos() - 32);
                }
                return Ok(Some((BlockHeader::from_bytes(&buf), skipped)));
            }

            if is_header_of_other_version(&buf) {
                let version = u16::from_le_bytes([buf[8], buf[9]]);
                debug!("skipping block header with unsupported version {:#x}", version);
                self.rejected_version = Some(version);
            }

            // Resume at the next 'w' after the start of the window.
            let next =
                buf[1..].iter().position(|&b| b == b'w').map_or(BlockHeader::SIZE, |i| i + 1);

            buf.copy_within(next.., 0);
            kept = BlockHeader::SIZE - next;
            skipped += next;

            if skipped >= self.max_search {
                return corrupt_error("no block header found within the search limit");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use symphonia_core::io::BufReader;

    fn header_bytes(version: u16, block_samples: u32, flags: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"wvpk");
        buf.extend_from_slice(&24u32.to_le_bytes());
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&1000u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&block_samples.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        buf
    }

    #[test]
    fn verify_decode_header() {
        let flags =
            1 | MONO_FLAG | INITIAL_BLOCK | FINAL_BLOCK | (9 << SRATE_LSB) | (3 << SHIFT_LSB);
        let data = header_bytes(0x407, 256, flags);

        let mut scanner = HeaderScanner::new(MAX_HEADER_SEARCH);
        let (header, skipped) = scanner.next_header(&mut BufReader::new(&data)).unwrap().unwrap();

        assert_eq!(skipped, 0);
        assert_eq!(header.version, 0x407);
        assert_eq!(header.total_samples(), Some(1000));
        assert_eq!(header.block_samples, 256);
        assert_eq!(header.crc, 0xdeadbeef);
        assert_eq!(header.body_len(), 0);
        assert_eq!(header.bytes_per_sample(), 2);
        assert_eq!(header.shift(), 3);
        assert_eq!(header.sample_rate(), Some(44100));
        assert_eq!(header.block_channels(), 1);
        assert!(header.is_mono_data());
        assert!(header.is_initial_block() && header.is_final_block());
    }

    #[test]
    fn verify_custom_sample_rate_index() {
        let data = header_bytes(0x410, 1, 15 << SRATE_LSB);
        let mut scanner = HeaderScanner::new(MAX_HEADER_SEARCH);
        let (header, _) = scanner.next_header(&mut BufReader::new(&data)).unwrap().unwrap();
        assert_eq!(header.sample_rate(), None);
    }

    #[test]
    fn verify_resync_after_garbage() {
        // Garbage containing a false start.
        let mut data = b"xxwvpwvpkqq".to_vec();
        data.extend(header_bytes(0x402, 10, 0));

        let mut src = BufReader::new(&data);
        let mut scanner = HeaderScanner::new(MAX_HEADER_SEARCH);
        let (header, skipped) = scanner.next_header(&mut src).unwrap().unwrap();

        assert_eq!(skipped, 11);
        assert_eq!(header.block_samples, 10);
        assert_eq!(src.pos(), 43);
    }

    #[test]
    fn verify_end_of_stream() {
        let data = header_bytes(0x402, 10, 0);
        let mut scanner = HeaderScanner::new(MAX_HEADER_SEARCH);

        assert!(scanner.next_header(&mut BufReader::new(&data[..31])).unwrap().is_none());
        assert!(scanner.next_header(&mut BufReader::new(&[])).unwrap().is_none());
    }

    #[test]
    fn verify_rejects_unsupported_versions() {
        for version in [0x401u16, 0x411, 0x504] {
            let data = header_bytes(version, 10, 0);
            let mut scanner = HeaderScanner::new(MAX_HEADER_SEARCH);

            assert!(scanner.next_header(&mut BufReader::new(&data)).unwrap().is_none());
            assert_eq!(scanner.rejected_version(), Some(version));
        }
    }

    #[test]
    fn verify_search_limit() {
        let mut data = vec![0u8; 100];
        data.extend(header_bytes(0x402, 10, 0));

        let mut scanner = HeaderScanner::new(100);
        match scanner.next_header(&mut BufReader::new(&data)) {
            Err(Error::DecodeError(msg)) => assert!(msg.contains("search limit")),
            _ => panic!("expected a decode error"),
        }

        let mut scanner = HeaderScanner::new(101);
        let (_, skipped) = scanner.next_header(&mut BufReader::new(&data)).unwrap().unwrap();
        assert_eq!(skipped, 100);
    }
}
