// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal RIFF/WAVE writer for integer PCM.

use std::io::{self, Seek, SeekFrom, Write};

/// Size of the RIFF, fmt and data chunk headers.
const HEADER_LEN: u32 = 44;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WavSpec {
    pub channels: u16,
    pub sample_rate: u32,
    /// Significant bits per sample.
    pub bits_per_sample: u16,
    /// Bytes each sample occupies in the file, 1 to 4.
    pub bytes_per_sample: u16,
}

impl WavSpec {
    fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample
    }
}

/// Writes interleaved samples to a WAVE file. The chunk sizes are written when the writer is
/// finalized.
pub struct WavWriter<W: Write + Seek> {
    inner: W,
    spec: WavSpec,
    data_len: u32,
    packed: Vec<u8>,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(mut inner: W, spec: WavSpec) -> io::Result<Self> {
        write_header(&mut inner, &spec, 0)?;
        Ok(WavWriter { inner, spec, data_len: 0, packed: Vec::new() })
    }

    /// Appends interleaved samples, each right-justified in an `i32`.
    pub fn write_samples(&mut self, samples: &[i32]) -> io::Result<()> {
        self.packed.clear();
        pack_samples(samples, self.spec.bytes_per_sample, &mut self.packed);

        self.inner.write_all(&self.packed)?;
        self.data_len = self.data_len.saturating_add(self.packed.len() as u32);
        Ok(())
    }

    /// Gets the number of sample frames written so far.
    pub fn frames(&self) -> u32 {
        self.data_len / u32::from(self.spec.block_align().max(1))
    }

    /// Rewrites the header with the final chunk sizes and returns the underlying writer.
    pub fn finalize(mut self) -> io::Result<W> {
        // The data chunk is padded to an even length.
        if self.data_len & 1 != 0 {
            self.inner.write_all(&[0])?;
        }

        self.inner.seek(SeekFrom::Start(0))?;
        write_header(&mut self.inner, &self.spec, self.data_len)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn write_header<W: Write>(writer: &mut W, spec: &WavSpec, data_len: u32) -> io::Result<()> {
    let riff_len = (HEADER_LEN - 8).saturating_add(data_len + (data_len & 1));
    let byte_rate = spec.sample_rate * u32::from(spec.block_align());

    let mut header = Vec::with_capacity(HEADER_LEN as usize);

    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&riff_len.to_le_bytes());
    header.extend_from_slice(b"WAVE");

    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    // PCM
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&spec.channels.to_le_bytes());
    header.extend_from_slice(&spec.sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&spec.block_align().to_le_bytes());
    header.extend_from_slice(&spec.bits_per_sample.to_le_bytes());

    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_len.to_le_bytes());

    writer.write_all(&header)
}

/// Packs samples into little-endian lanes of `bytes_per_sample` bytes. 8-bit samples are stored
/// unsigned.
pub fn pack_samples(samples: &[i32], bytes_per_sample: u16, out: &mut Vec<u8>) {
    match bytes_per_sample {
        1 => out.extend(samples.iter().map(|&s| s.wrapping_add(128) as u8)),
        2 => samples.iter().for_each(|&s| out.extend_from_slice(&(s as i16).to_le_bytes())),
        3 => samples.iter().for_each(|&s| out.extend_from_slice(&s.to_le_bytes()[..3])),
        _ => samples.iter().for_each(|&s| out.extend_from_slice(&s.to_le_bytes())),
    }
}
