// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The stream controller.
//!
//! [`WavpackContext`] owns the [`MediaSourceStream`] and pulls blocks from it as samples are
//! requested.

use std::io;

use bitflags::bitflags;
use log::{debug, warn};
use symphonia_core::io::{MediaSourceStream, ReadBytes};

use crate::errors::{incompatible_error, metadata_error, unsupported_version_error, Error, Result};
use crate::header::{
    BlockHeader, HeaderScanner, FLOAT_DATA, INT32_DATA, MAX_HEADER_SEARCH, MONO_FLAG,
};
use crate::metadata::{process_sub_block, Dispatch, MetadataReader};
use crate::unpack::StreamState;

/// Hybrid mode is in use.
pub const CONFIG_HYBRID_FLAG: u32 = 0x8;
/// The samples are 32-bit floating point.
pub const CONFIG_FLOAT_DATA: u32 = 0x80;
/// The encoder ran in fast mode.
pub const CONFIG_FAST_FLAG: u32 = 0x200;
/// The encoder ran in high quality mode.
pub const CONFIG_HIGH_FLAG: u32 = 0x800;
/// The stream was encoded lossily.
pub const CONFIG_LOSSY_MODE: u32 = 0x100_0000;

/// Number of samples decoded per call into the block decoder.
const DECODE_CHUNK_LEN: usize = 4096;

bitflags! {
    /// Summary of how a stream was encoded.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Mode: u32 {
        const LOSSLESS = 0x2;
        const HYBRID   = 0x4;
        const FLOAT    = 0x8;
        const HIGH     = 0x20;
        const FAST     = 0x40;
    }
}

/// Stream-wide format information.
///
/// Fields are filled from the first block with audio and from the metadata of later blocks. A
/// zero means the value was never provided.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// The low byte mirrors the block header flags. The upper bytes come from the encoder
    /// configuration metadata.
    pub flags: u32,
    pub num_channels: u32,
    pub channel_mask: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub bytes_per_sample: u32,
    /// Normalization exponent of floating point streams.
    pub float_norm_exp: u8,
}

/// `DecoderOptions` is a common set of options that all decoder instances use.
#[derive(Copy, Clone, Debug)]
pub struct DecoderOptions {
    /// Maximum number of bytes skipped while searching for a block header before the stream is
    /// considered corrupt.
    pub max_header_search: usize,
    /// Ignore the sample positions stored in block headers and number samples from zero at the
    /// point the stream was opened.
    pub streaming: bool,
    /// Compare the checksum of every decoded block against its header and count mismatches as
    /// errors.
    pub verify_crc: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions { max_header_search: MAX_HEADER_SEARCH, streaming: false, verify_crc: true }
    }
}

/// A WavPack decoder over a media source.
pub struct WavpackContext {
    source: MediaSourceStream,
    options: DecoderOptions,
    scanner: HeaderScanner,
    metadata: MetadataReader,
    config: StreamConfig,
    stream: StreamState,
    total_samples: Option<u32>,
    crc_errors: u32,
    reduced_channels: u32,
    lossy_blocks: bool,
    /// Bytes of the current block after its bitstream.
    trailing_bytes: u64,
    /// The error that stopped decoding, if any.
    error: Option<Error>,
    scratch: Vec<i32>,
}

impl WavpackContext {
    /// Opens a stream with the default options.
    pub fn open(source: MediaSourceStream) -> Result<Self> {
        Self::open_with_options(source, &Default::default())
    }

    /// Opens a stream by reading blocks until one with audio is found. The format of the stream
    /// is taken from that block.
    pub fn open_with_options(source: MediaSourceStream, options: &DecoderOptions) -> Result<Self> {
        let mut ctx = WavpackContext {
            source,
            options: *options,
            scanner: HeaderScanner::new(options.max_header_search),
            metadata: Default::default(),
            config: Default::default(),
            stream: Default::default(),
            total_samples: None,
            crc_errors: 0,
            reduced_channels: 0,
            lossy_blocks: false,
            trailing_bytes: 0,
            error: None,
            scratch: vec![0; 2 * DECODE_CHUNK_LEN],
        };

        loop {
            let header = match ctx.read_next_header()? {
                Some(header) => header,
                None => {
                    return match ctx.scanner.rejected_version() {
                        Some(version) => {
                            warn!("no block with a supported version, last seen {:#x}", version);
                            unsupported_version_error()
                        }
                        None => incompatible_error("wavpack: no block found"),
                    };
                }
            };

            ctx.init_block(header)?;

            if ctx.stream.header.block_samples != 0 {
                break;
            }
        }

        let header = &ctx.stream.header;

        // Later blocks are placed relative to this position.
        if header.block_index != u32::MAX {
            ctx.stream.sample_index = header.block_index;
        }

        ctx.total_samples = header.total_samples();

        ctx.config.flags &= !0xff;
        ctx.config.flags |= header.flags & 0xff;

        ctx.config.bytes_per_sample = header.bytes_per_sample();
        ctx.config.bits_per_sample =
            (ctx.config.bytes_per_sample * 8).saturating_sub(header.shift());

        if ctx.config.flags & CONFIG_FLOAT_DATA != 0 {
            ctx.config.bytes_per_sample = 3;
            ctx.config.bits_per_sample = 24;
        }

        if ctx.config.sample_rate == 0 {
            ctx.config.sample_rate = header.sample_rate().unwrap_or(0);
        }

        if ctx.config.num_channels == 0 {
            ctx.config.num_channels = if header.flags & MONO_FLAG != 0 { 1 } else { 2 };
            ctx.config.channel_mask = 0x5 - ctx.config.num_channels;
        }

        if !header.is_final_block() {
            ctx.reduced_channels = if header.flags & MONO_FLAG != 0 { 1 } else { 2 };
        }

        debug!(
            "opened stream: version={:#x}, channels={}, rate={}, bits={}, samples={:?}",
            header.version,
            ctx.num_channels(),
            ctx.sample_rate(),
            ctx.bits_per_sample(),
            ctx.total_samples,
        );

        Ok(ctx)
    }

    /// Decodes up-to `samples` samples into `out` and returns the number decoded. Each sample
    /// occupies [`Self::reduced_channels`] values of `out`.
    ///
    /// Fewer samples than requested are returned only at the end of the stream or after an
    /// error stopped decoding. Once decoding has stopped every call returns 0.
    pub fn unpack_samples(&mut self, out: &mut [i32], samples: u32) -> u32 {
        if self.error.is_some() {
            return 0;
        }

        let stride = self.output_channels();
        let mut samples = samples.min((out.len() / stride).min(u32::MAX as usize) as u32);
        let mut written = 0;

        while samples > 0 {
            if !self.stream.header.is_initial_block()
                || self.stream.header.block_samples == 0
                || self.stream.is_block_done()
            {
                let header = match self.read_next_header() {
                    Ok(Some(header)) => header,
                    Ok(None) => break,
                    Err(err) => {
                        self.stop(err);
                        break;
                    }
                };

                if let Err(err) = self.init_block(header) {
                    self.stop(err);
                    break;
                }

                let header = &self.stream.header;

                if header.block_samples == 0
                    || !header.is_initial_block()
                    || self.stream.is_block_done()
                {
                    continue;
                }
            }

            // Silence for samples missing before the block.
            if self.stream.sample_index < self.stream.header.block_index {
                let gap = (self.stream.header.block_index - self.stream.sample_index).min(samples);

                out[written as usize * stride..(written + gap) as usize * stride].fill(0);

                debug!("filled gap of {} samples at {}", gap, self.stream.sample_index);

                self.stream.sample_index += gap;
                written += gap;
                samples -= gap;
                continue;
            }

            let count = samples.min(DECODE_CHUNK_LEN as u32);
            let decoded = self.stream.unpack_samples(&mut self.scratch, count);

            let block_channels = self.stream.header.block_channels();
            let dst = &mut out[written as usize * stride..(written + decoded) as usize * stride];

            if block_channels == stride {
                dst.copy_from_slice(&self.scratch[..decoded as usize * stride]);
            }
            else {
                let lanes = stride.min(block_channels);

                let frames = dst.chunks_exact_mut(stride);

                for (frame, src) in frames.zip(self.scratch.chunks_exact(block_channels)) {
                    frame[..lanes].copy_from_slice(&src[..lanes]);
                    frame[lanes..].fill(0);
                }
            }

            written += decoded;
            samples -= decoded;

            if self.stream.is_block_done()
                && self.options.verify_crc
                && self.stream.crc != self.stream.header.crc
            {
                warn!(
                    "checksum mismatch in block at {}: expected {:#010x}, got {:#010x}",
                    self.stream.header.block_index, self.stream.header.crc, self.stream.crc
                );
                self.crc_errors += 1;
            }

            if Some(self.stream.sample_index) == self.total_samples {
                break;
            }
        }

        written
    }

    /// Gets the total number of samples in the stream, if known.
    pub fn num_samples(&self) -> Option<u32> {
        self.total_samples
    }

    /// Gets the index of the next sample to be returned.
    pub fn sample_index(&self) -> u32 {
        self.stream.sample_index
    }

    /// Gets the number of blocks found to be corrupt.
    pub fn num_errors(&self) -> u32 {
        self.crc_errors
    }

    /// Gets how the stream was encoded.
    pub fn mode(&self) -> Mode {
        let mut mode = Mode::empty();

        if self.config.flags & CONFIG_HYBRID_FLAG != 0 {
            mode |= Mode::HYBRID;
        }
        else if self.config.flags & CONFIG_LOSSY_MODE == 0 {
            mode |= Mode::LOSSLESS;
        }

        if self.lossy_blocks {
            mode.remove(Mode::LOSSLESS);
        }

        if self.config.flags & CONFIG_FLOAT_DATA != 0 {
            mode |= Mode::FLOAT;
        }

        if self.config.flags & CONFIG_HIGH_FLAG != 0 {
            mode |= Mode::HIGH;
        }

        if self.config.flags & CONFIG_FAST_FLAG != 0 {
            mode |= Mode::FAST;
        }

        mode
    }

    pub fn sample_rate(&self) -> u32 {
        match self.config.sample_rate {
            0 => 44100,
            rate => rate,
        }
    }

    pub fn num_channels(&self) -> u32 {
        match self.config.num_channels {
            0 => 2,
            channels => channels,
        }
    }

    /// Gets the number of channels actually returned per sample. This is less than
    /// [`Self::num_channels`] for multichannel streams, of which only the first block of every
    /// group is decoded. Never more than 2.
    pub fn reduced_channels(&self) -> u32 {
        match self.reduced_channels {
            0 => self.num_channels().min(2),
            channels => channels,
        }
    }

    pub fn bits_per_sample(&self) -> u32 {
        match self.config.bits_per_sample {
            0 => 16,
            bits => bits,
        }
    }

    /// Gets the number of bytes needed to store a sample of one channel. Samples are returned
    /// right-justified in 32-bit integers regardless.
    pub fn bytes_per_sample(&self) -> u32 {
        match self.config.bytes_per_sample {
            0 => 2,
            bytes => bytes,
        }
    }

    pub fn channel_mask(&self) -> u32 {
        self.config.channel_mask
    }

    pub fn float_norm_exp(&self) -> u8 {
        self.config.float_norm_exp
    }

    /// Gets the format version of the current block.
    pub fn version(&self) -> u16 {
        self.stream.header.version
    }

    /// Gets the error that stopped decoding, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Gets the text of the error that stopped decoding, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|err| err.to_string())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn into_inner(self) -> MediaSourceStream {
        self.source
    }

    fn output_channels(&self) -> usize {
        self.reduced_channels().max(1) as usize
    }

    fn stop(&mut self, err: Error) {
        warn!("decoding stopped at sample {}: {}", self.stream.sample_index, err);
        self.error = Some(err);
    }

    /// Skips the rest of the current block and reads the header of the next one.
    fn read_next_header(&mut self) -> Result<Option<BlockHeader>> {
        let left = self.trailing_bytes;

        self.trailing_bytes = 0;
        self.stream.bits.close();

        if left > 0 {
            match self.source.ignore_bytes(left) {
                Ok(()) => (),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err.into()),
            }
        }

        let mut header = match self.scanner.next_header(&mut self.source)? {
            Some((header, _)) => header,
            None => return Ok(None),
        };

        if self.options.streaming {
            header.block_index = self.stream.sample_index;
        }

        Ok(Some(header))
    }

    /// Makes `header` the current block and reads its metadata up-to the audio bitstream.
    fn init_block(&mut self, header: BlockHeader) -> Result<()> {
        debug!(
            "block: pos={}, index={}, samples={}, flags={:#010x}",
            self.source.pos() - BlockHeader::SIZE as u64,
            header.block_index,
            header.block_samples,
            header.flags
        );

        self.stream.reset_for_block(header);
        self.metadata.start_block(u64::from(self.stream.header.body_len()));

        let mut bitstream_len = None;

        while let Some(sub) = self.metadata.next_sub_block(&mut self.source)? {
            if process_sub_block(&sub, &mut self.stream, &mut self.config)? == Dispatch::Bitstream {
                bitstream_len = Some(u64::from(sub.byte_length + (sub.byte_length & 1)));
                break;
            }
        }

        self.trailing_bytes = self.metadata.bytes_left();

        match bitstream_len {
            Some(len) => self.stream.bits.open(&mut self.source, len),
            None if self.stream.header.block_samples != 0 => {
                return metadata_error("wavpack: block has no audio bitstream");
            }
            None => (),
        }

        let flags = self.stream.header.flags;

        if flags & INT32_DATA != 0 && self.stream.int32.is_lossy() {
            self.lossy_blocks = true;
        }

        if flags & FLOAT_DATA != 0 {
            if self.stream.float.is_lossy() {
                self.lossy_blocks = true;
            }
            self.config.float_norm_exp = self.stream.float.norm_exp;
        }

        Ok(())
    }
}
