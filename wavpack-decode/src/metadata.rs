// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Metadata sub-blocks and their effect on the stream state.
//!
//! A block header is followed by a chain of sub-blocks. Each starts with an id byte and a length
//! in 16-bit words. Sub-blocks up-to [`MAX_PAYLOAD_LEN`] bytes are buffered; larger ones are
//! skipped. The audio bitstream sub-block ends the chain and is loaded by the bit reader.

use log::{debug, trace};
use symphonia_core::io::{BufReader, FiniteStream, ReadBytes};

use crate::context::StreamConfig;
use crate::decorr::{is_valid_term, MAX_NTERMS, MAX_TERM};
use crate::errors::{metadata_error, Result};
use crate::fixup::{FloatInfo, Int32Info};
use crate::header::{HYBRID_BITRATE, HYBRID_FLAG};
use crate::tables::{exp2s, restore_weight};
use crate::unpack::StreamState;

// Sub-block id modifiers.
pub const ID_OPTIONAL_DATA: u8 = 0x20;
pub const ID_ODD_SIZE: u8 = 0x40;
pub const ID_LARGE: u8 = 0x80;

// Sub-block ids.
pub const ID_DUMMY: u8 = 0x0;
pub const ID_DECORR_TERMS: u8 = 0x2;
pub const ID_DECORR_WEIGHTS: u8 = 0x3;
pub const ID_DECORR_SAMPLES: u8 = 0x4;
pub const ID_ENTROPY_VARS: u8 = 0x5;
pub const ID_HYBRID_PROFILE: u8 = 0x6;
pub const ID_SHAPING_WEIGHTS: u8 = 0x7;
pub const ID_FLOAT_INFO: u8 = 0x8;
pub const ID_INT32_INFO: u8 = 0x9;
pub const ID_WV_BITSTREAM: u8 = 0xa;
pub const ID_WVC_BITSTREAM: u8 = 0xb;
pub const ID_WVX_BITSTREAM: u8 = 0xc;
pub const ID_CHANNEL_INFO: u8 = 0xd;

pub const ID_RIFF_HEADER: u8 = ID_OPTIONAL_DATA | 0x1;
pub const ID_RIFF_TRAILER: u8 = ID_OPTIONAL_DATA | 0x2;
pub const ID_CONFIG_BLOCK: u8 = ID_OPTIONAL_DATA | 0x5;
pub const ID_MD5_CHECKSUM: u8 = ID_OPTIONAL_DATA | 0x6;
pub const ID_SAMPLE_RATE: u8 = ID_OPTIONAL_DATA | 0x7;

/// Largest payload that is buffered.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// One metadata sub-block.
#[derive(Debug)]
pub struct SubBlock<'a> {
    /// The id with the size modifiers removed.
    pub id: u8,
    /// Payload length in bytes, excluding padding.
    pub byte_length: u32,
    /// The payload. `None` for the audio bitstream and for payloads too large to buffer.
    pub data: Option<&'a [u8]>,
}

/// Reads the sub-blocks of one block.
pub struct MetadataReader {
    buf: Box<[u8; MAX_PAYLOAD_LEN]>,
    block_left: u64,
}

impl Default for MetadataReader {
    fn default() -> Self {
        MetadataReader { buf: Box::new([0; MAX_PAYLOAD_LEN]), block_left: 0 }
    }
}

impl MetadataReader {
    /// Starts reading a block with `len` bytes of sub-blocks.
    pub fn start_block(&mut self, len: u64) {
        self.block_left = len;
    }

    /// Gets the number of bytes of the block after the sub-blocks read so far.
    pub fn bytes_left(&self) -> u64 {
        self.block_left
    }

    /// Reads the next sub-block, or returns `None` at the end of the block.
    pub fn next_sub_block<B: ReadBytes>(&mut self, src: &mut B) -> Result<Option<SubBlock<'_>>> {
        // A sub-block header is at least 2 bytes.
        if self.block_left < 2 {
            return Ok(None);
        }

        let mut id = src.read_u8()?;
        let mut byte_length = u32::from(src.read_u8()?) << 1;
        let mut header_len = 2;

        if id & ID_LARGE != 0 {
            id &= !ID_LARGE;
            byte_length += u32::from(src.read_u8()?) << 9;
            byte_length += u32::from(src.read_u8()?) << 17;
            header_len = 4;
        }

        if id & ID_ODD_SIZE != 0 {
            id &= !ID_ODD_SIZE;

            if byte_length == 0 {
                return metadata_error("wavpack: odd-sized sub-block without data");
            }
            byte_length -= 1;
        }

        let padded_len = u64::from(byte_length + (byte_length & 1));

        if header_len + padded_len > self.block_left {
            return metadata_error("wavpack: sub-block exceeds the block size");
        }

        self.block_left -= header_len + padded_len;

        trace!("sub-block: id={:#04x}, len={}", id, byte_length);

        if byte_length == 0 {
            return Ok(Some(SubBlock { id, byte_length, data: Some(&[]) }));
        }

        if id == ID_WV_BITSTREAM {
            return Ok(Some(SubBlock { id, byte_length, data: None }));
        }

        if padded_len > MAX_PAYLOAD_LEN as u64 {
            debug!("skipping {} byte sub-block with id {:#04x}", byte_length, id);

            let mut left = padded_len;
            while left > 0 {
                let len = left.min(MAX_PAYLOAD_LEN as u64);
                src.ignore_bytes(len)?;
                left -= len;
            }

            return Ok(Some(SubBlock { id, byte_length, data: None }));
        }

        let buf = &mut self.buf[..padded_len as usize];
        src.read_buf_exact(buf)?;

        Ok(Some(SubBlock { id, byte_length, data: Some(&buf[..byte_length as usize]) }))
    }
}

/// The outcome of processing one sub-block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep reading sub-blocks.
    Continue,
    /// The audio bitstream follows in the source. It is the last sub-block read.
    Bitstream,
}

/// Applies a sub-block to the stream state and configuration.
pub fn process_sub_block(
    sub: &SubBlock<'_>,
    stream: &mut StreamState,
    config: &mut StreamConfig,
) -> Result<Dispatch> {
    let payload = || match sub.data {
        Some(data) => Ok(data),
        None => metadata_error("wavpack: sub-block too large"),
    };

    match sub.id {
        ID_DUMMY | ID_SHAPING_WEIGHTS | ID_WVC_BITSTREAM | ID_WVX_BITSTREAM => (),
        ID_DECORR_TERMS => read_decorr_terms(stream, payload()?)?,
        ID_DECORR_WEIGHTS => read_decorr_weights(stream, payload()?)?,
        ID_DECORR_SAMPLES => read_decorr_samples(stream, payload()?)?,
        ID_ENTROPY_VARS => read_entropy_vars(stream, payload()?)?,
        ID_HYBRID_PROFILE => read_hybrid_profile(stream, payload()?)?,
        ID_FLOAT_INFO => stream.float = read_float_info(payload()?)?,
        ID_INT32_INFO => stream.int32 = read_int32_info(payload()?)?,
        ID_CHANNEL_INFO => read_channel_info(config, payload()?)?,
        ID_SAMPLE_RATE => read_sample_rate(config, payload()?)?,
        ID_CONFIG_BLOCK => read_config_block(config, payload()?)?,
        ID_WV_BITSTREAM => return Ok(Dispatch::Bitstream),
        id if id & ID_OPTIONAL_DATA != 0 => {
            debug!("ignoring optional sub-block with id {:#04x}", id);
        }
        _ => return metadata_error("wavpack: unknown mandatory sub-block"),
    }

    Ok(Dispatch::Continue)
}

fn channels_of(stream: &StreamState) -> usize {
    if stream.header.is_mono_data() {
        1
    }
    else {
        2
    }
}

/// Reads a signed 16-bit log value and returns it in linear form.
fn read_log_signed(reader: &mut BufReader<'_>) -> Result<i32> {
    match reader.read_i16() {
        Ok(log) => Ok(exp2s(i32::from(log))),
        Err(_) => metadata_error("wavpack: truncated sub-block"),
    }
}

/// Reads an unsigned 16-bit log value and returns it in linear form.
fn read_log_unsigned(reader: &mut BufReader<'_>) -> Result<u32> {
    match reader.read_u16() {
        Ok(log) => Ok(exp2s(i32::from(log)) as u32),
        Err(_) => metadata_error("wavpack: truncated sub-block"),
    }
}

fn read_decorr_terms(stream: &mut StreamState, data: &[u8]) -> Result<()> {
    if data.len() > MAX_NTERMS {
        return metadata_error("wavpack: too many decorrelation terms");
    }

    stream.num_terms = data.len();

    // Terms are stored last pass first.
    for (dpp, &byte) in stream.passes[..data.len()].iter_mut().rev().zip(data) {
        dpp.term = i32::from(byte & 0x1f) - 5;
        dpp.delta = i32::from(byte >> 5) & 0x7;

        if !is_valid_term(dpp.term) {
            return metadata_error("wavpack: invalid decorrelation term");
        }
    }

    Ok(())
}

fn read_decorr_weights(stream: &mut StreamState, data: &[u8]) -> Result<()> {
    let channels = channels_of(stream);
    let num_terms = stream.num_terms;

    if data.len() / channels > num_terms {
        return metadata_error("wavpack: more decorrelation weights than terms");
    }

    let passes = &mut stream.passes[..num_terms];

    for dpp in passes.iter_mut() {
        dpp.weight_a = 0;
        dpp.weight_b = 0;
    }

    for (dpp, weights) in passes.iter_mut().rev().zip(data.chunks_exact(channels)) {
        dpp.weight_a = restore_weight(weights[0] as i8);

        if channels == 2 {
            dpp.weight_b = restore_weight(weights[1] as i8);
        }
    }

    Ok(())
}

fn read_decorr_samples(stream: &mut StreamState, data: &[u8]) -> Result<()> {
    let channels = channels_of(stream);
    let num_terms = stream.num_terms;

    for dpp in stream.passes[..num_terms].iter_mut() {
        dpp.clear_history();
    }

    let mut reader = BufReader::new(data);

    // Early hybrid streams stored an unused value per channel first.
    if stream.header.version == 0x402 && stream.header.flags & HYBRID_FLAG != 0 {
        if reader.ignore_bytes(2 * channels as u64).is_err() {
            return metadata_error("wavpack: truncated decorrelation samples");
        }
    }

    for dpp in stream.passes[..num_terms].iter_mut().rev() {
        if reader.bytes_available() == 0 {
            break;
        }

        if dpp.term > MAX_TERM {
            dpp.samples_a[0] = read_log_signed(&mut reader)?;
            dpp.samples_a[1] = read_log_signed(&mut reader)?;

            if channels == 2 {
                dpp.samples_b[0] = read_log_signed(&mut reader)?;
                dpp.samples_b[1] = read_log_signed(&mut reader)?;
            }
        }
        else if dpp.term < 0 {
            dpp.samples_a[0] = read_log_signed(&mut reader)?;
            dpp.samples_b[0] = read_log_signed(&mut reader)?;
        }
        else {
            for m in 0..dpp.term as usize {
                dpp.samples_a[m] = read_log_signed(&mut reader)?;

                if channels == 2 {
                    dpp.samples_b[m] = read_log_signed(&mut reader)?;
                }
            }
        }
    }

    if reader.bytes_available() != 0 {
        return metadata_error("wavpack: unexpected decorrelation samples");
    }

    Ok(())
}

fn read_entropy_vars(stream: &mut StreamState, data: &[u8]) -> Result<()> {
    let channels = channels_of(stream);

    // Mono blocks may carry a second set of medians, which is ignored.
    if data.len() < 6 * channels {
        return metadata_error("wavpack: truncated entropy variables");
    }

    let mut reader = BufReader::new(data);

    for c in stream.words.c[..channels].iter_mut() {
        for median in c.median.iter_mut() {
            *median = read_log_unsigned(&mut reader)?;
        }
    }

    Ok(())
}

fn read_hybrid_profile(stream: &mut StreamState, data: &[u8]) -> Result<()> {
    let channels = channels_of(stream);
    let words = &mut stream.words;

    let mut reader = BufReader::new(data);

    if stream.header.flags & HYBRID_BITRATE != 0 {
        for c in words.c[..channels].iter_mut() {
            c.slow_level = read_log_unsigned(&mut reader)?;
        }
    }

    for acc in words.bitrate_acc[..channels].iter_mut() {
        *acc = match reader.read_u16() {
            Ok(value) => u32::from(value) << 16,
            Err(_) => return metadata_error("wavpack: truncated hybrid profile"),
        };
    }

    if reader.bytes_available() > 0 {
        for delta in words.bitrate_delta[..channels].iter_mut() {
            *delta = read_log_signed(&mut reader)? as u32;
        }

        if reader.bytes_available() > 0 {
            return metadata_error("wavpack: unexpected hybrid profile data");
        }
    }
    else {
        words.bitrate_delta = [0; 2];
    }

    Ok(())
}

fn read_float_info(data: &[u8]) -> Result<FloatInfo> {
    match *data {
        [flags, shift, max_exp, norm_exp] => Ok(FloatInfo { flags, shift, max_exp, norm_exp }),
        _ => metadata_error("wavpack: invalid float info length"),
    }
}

fn read_int32_info(data: &[u8]) -> Result<Int32Info> {
    match *data {
        [sent_bits, zeros, ones, dups] => Ok(Int32Info { sent_bits, zeros, ones, dups }),
        _ => metadata_error("wavpack: invalid int32 info length"),
    }
}

fn read_channel_info(config: &mut StreamConfig, data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > 5 {
        return metadata_error("wavpack: invalid channel info length");
    }

    config.num_channels = u32::from(data[0]);
    config.channel_mask =
        data[1..].iter().enumerate().fold(0, |mask, (i, &byte)| mask | u32::from(byte) << (8 * i));

    Ok(())
}

fn read_sample_rate(config: &mut StreamConfig, data: &[u8]) -> Result<()> {
    if let [b0, b1, b2] = *data {
        config.sample_rate = u32::from_le_bytes([b0, b1, b2, 0]);
    }
    Ok(())
}

fn read_config_block(config: &mut StreamConfig, data: &[u8]) -> Result<()> {
    if let [b0, b1, b2, ..] = *data {
        config.flags &= 0xff;
        config.flags |= u32::from_le_bytes([0, b0, b1, b2]);
    }
    Ok(())
}
