// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed to better express the bit-exact arithmetic of the format.
#![allow(clippy::comparison_chain)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::collapsible_else_if)]

//! A streaming decoder for WavPack (`.wv`) audio.
//!
//! A [`WavpackContext`] is opened over a [`MediaSourceStream`] and pulls blocks from it as
//! samples are requested. Samples are returned interleaved and right-justified in `i32`
//! regardless of the stored width. Floating point streams are converted to integers and clamped
//! to the signed 24-bit range.
//!
//! ```no_run
//! use std::fs::File;
//!
//! use symphonia_core::io::MediaSourceStream;
//! use wavpack_decode::WavpackContext;
//!
//! let mss = MediaSourceStream::new(Box::new(File::open("audio.wv")?), Default::default());
//! let mut ctx = WavpackContext::open(mss)?;
//! let mut buf = vec![0; 4096 * ctx.reduced_channels() as usize];
//!
//! loop {
//!     let samples = ctx.unpack_samples(&mut buf, 4096);
//!     if samples == 0 {
//!         break;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Only lossless and hybrid-lossy streams with up to two channels per block are decoded. For
//! multichannel streams the first block of every group is decoded and
//! [`WavpackContext::reduced_channels`] reports how many channels that yields.
//!
//! [`MediaSourceStream`]: symphonia_core::io::MediaSourceStream

pub mod bits;
pub mod context;
pub mod decorr;
pub mod errors;
pub mod fixup;
pub mod header;
pub mod metadata;
pub mod tables;
pub mod unpack;
pub mod words;

pub use context::{DecoderOptions, Mode, StreamConfig, WavpackContext};
pub use errors::{Error, Result};
