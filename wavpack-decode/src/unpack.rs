// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of the samples of a single block.

use log::warn;

use crate::bits::BitstreamState;
use crate::decorr::{decorr_mono, decorr_stereo, DecorrPass, MAX_NTERMS};
use crate::fixup::{expand_false_stereo, fixup_samples, recombine_mid_side, FloatInfo, Int32Info};
use crate::header::{BlockHeader, FALSE_STEREO, HYBRID_FLAG, JOINT_STEREO};
use crate::words::WordsState;

/// Seed of the per-block checksum.
pub const CRC_SEED: u32 = 0xffff_ffff;

/// Decoding state of the current block.
#[derive(Default)]
pub struct StreamState {
    pub header: BlockHeader,
    pub bits: BitstreamState,
    pub words: WordsState,
    pub passes: [DecorrPass; MAX_NTERMS],
    pub num_terms: usize,
    /// Index of the next sample to be decoded.
    pub sample_index: u32,
    /// Set once corruption was detected. The rest of the block decodes as silence.
    pub mute_error: bool,
    pub crc: u32,
    pub int32: Int32Info,
    pub float: FloatInfo,
}

impl StreamState {
    /// Resets the decoder state for a new block. Format parameters of the previous block are
    /// kept until metadata replaces them.
    pub fn reset_for_block(&mut self, header: BlockHeader) {
        self.header = header;
        self.bits.close();
        self.words.reset();
        self.passes = Default::default();
        self.num_terms = 0;
        self.mute_error = false;
        self.crc = CRC_SEED;
    }

    /// Gets the index one past the last sample of the block.
    pub fn block_end(&self) -> u32 {
        self.header.block_index.wrapping_add(self.header.block_samples)
    }

    /// Returns true if every sample of the block was decoded.
    pub fn is_block_done(&self) -> bool {
        self.sample_index >= self.block_end()
    }

    /// Decodes up-to `count` samples of the current block into `buf`, one value per sample for
    /// mono blocks and two interleaved values otherwise. `buf` must hold `2 * count` values.
    ///
    /// Returns the number of samples decoded, which is less than `count` only at the end of the
    /// block.
    pub fn unpack_samples(&mut self, buf: &mut [i32], count: u32) -> u32 {
        let flags = self.header.flags;
        let count = count.min(self.block_end().wrapping_sub(self.sample_index));
        let channels = self.header.block_channels();
        let num_values = count as usize * channels;

        let values = &mut buf[..num_values];

        if self.mute_error {
            values.fill(0);
            self.sample_index += count;
            return count;
        }

        // Decoded values beyond this magnitude can only come from corrupt data.
        let mut mute_limit = (1i64 << self.header.magnitude_bits()) + 2;

        if flags & HYBRID_FLAG != 0 {
            mute_limit *= 2;
        }

        // Residuals.
        let coded_channels = if self.header.is_mono_data() { 1 } else { 2 };
        let coded_values = count as usize * coded_channels;

        let decoded = {
            let mut bs = self.bits.reader();
            self.words.decode(&mut bs, flags, &mut values[..coded_values])
        };

        values[decoded * coded_channels..coded_values].fill(0);

        // Decorrelation.
        let passes = &mut self.passes[..self.num_terms];

        if self.header.is_mono_data() {
            decorr_mono(passes, &mut values[..coded_values]);
        }
        else {
            decorr_stereo(passes, &mut values[..coded_values]);
        }

        // Joint stereo, range check and checksum.
        let mut crc = self.crc;
        let mut good = decoded as u32;

        if self.header.is_mono_data() {
            for (i, &value) in values[..decoded].iter().enumerate() {
                if i64::from(value).abs() > mute_limit {
                    good = i as u32;
                    break;
                }
                crc = crc.wrapping_mul(3).wrapping_add(value as u32);
            }
        }
        else {
            let joint_stereo = flags & JOINT_STEREO != 0;

            for (i, frame) in values[..2 * decoded].chunks_exact_mut(2).enumerate() {
                if joint_stereo {
                    recombine_mid_side(frame);
                }

                let peak = i64::from(frame[0]).abs().max(i64::from(frame[1]).abs());

                if peak > mute_limit {
                    good = i as u32;
                    break;
                }

                crc = crc.wrapping_mul(3).wrapping_add(frame[0] as u32);
                crc = crc.wrapping_mul(3).wrapping_add(frame[1] as u32);
            }
        }

        if good != count {
            warn!(
                "block at sample {} is corrupt at sample {}; muting the rest of the block",
                self.header.block_index,
                self.sample_index + good
            );
            values.fill(0);
            self.mute_error = true;
        }
        else {
            fixup_samples(flags, &self.float, &self.int32, &mut values[..coded_values]);

            if flags & FALSE_STEREO != 0 && channels == 2 {
                expand_false_stereo(values, count as usize);
            }
        }

        self.crc = crc;
        self.sample_index += count;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MAG_LSB, MONO_FLAG};
    use symphonia_core::io::BufReader;

    fn mono_block(block_samples: u32) -> StreamState {
        let mut stream = StreamState::default();
        stream.reset_for_block(BlockHeader {
            block_samples,
            flags: 1 | MONO_FLAG | (16 << MAG_LSB),
            ..Default::default()
        });
        // Medians large enough to avoid the zero run.
        stream.words.c[0].median = [256, 256, 256];
        stream
    }

    #[test]
    fn verify_block_bounds() {
        let mut stream = mono_block(4);
        stream.header.block_index = 10;
        stream.sample_index = 12;

        assert_eq!(stream.block_end(), 14);
        assert!(!stream.is_block_done());

        stream.mute_error = true;
        let mut buf = [9i32; 16];
        assert_eq!(stream.unpack_samples(&mut buf, 8), 2);
        assert_eq!(&buf[..3], &[0, 0, 9]);
        assert!(stream.is_block_done());
    }

    #[test]
    fn verify_truncated_bitstream_mutes() {
        let mut stream = mono_block(64);
        // A single byte of zeros decodes a couple of small residuals before the reader runs
        // dry and produces only ones, which is detected as corrupt.
        stream.bits.open(&mut BufReader::new(&[0u8]), 1);

        let mut buf = [1i32; 128];

        assert_eq!(stream.unpack_samples(&mut buf, 64), 64);
        assert!(stream.mute_error);
        assert!(buf[..64].iter().all(|&v| v == 0));
        assert!(stream.bits.is_error());
        assert_eq!(stream.sample_index, 64);
    }

    #[test]
    fn verify_crc_of_silence() {
        // Medians at zero select the zero run: 7 ones, a zero and 6 bits of 0x3f code a run of
        // 127 zeros.
        let mut stream = mono_block(100);
        stream.words.c[0].median = [0; 3];
        stream.bits.open(&mut BufReader::new(&[0x7f, 0x3f]), 2);

        let mut buf = [1i32; 200];

        assert_eq!(stream.unpack_samples(&mut buf, 100), 100);
        assert!(!stream.mute_error);
        assert!(buf[..100].iter().all(|&v| v == 0));

        let expected = (0..100).fold(CRC_SEED, |crc: u32, _| crc.wrapping_mul(3));
        assert_eq!(stream.crc, expected);
    }
}
