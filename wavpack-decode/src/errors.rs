// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module maps the WavPack failure classes onto Symphonia's [`Error`].
//!
//! * No block header within the search limit, and malformed metadata, are
//!   [`Error::DecodeError`].
//! * An unsupported stream version, and a source without any WavPack block, are
//!   [`Error::Unsupported`].
//! * Read failures of the source are [`Error::IoError`].
//!
//! Every error is fatal for the context that produced it. CRC mismatches and muted blocks are
//! not errors: they are counted and recovered from while decoding continues.

pub use symphonia_core::errors::{decode_error, unsupported_error, Error, Result};

/// Message of the error returned when a block header has a version outside the supported range.
pub const UNSUPPORTED_VERSION: &str = "wavpack: unsupported stream version";

/// Convenience function to create an error for a byte stream without a recognizable block
/// header.
pub fn corrupt_error<T>(desc: &'static str) -> Result<T> {
    decode_error(desc)
}

/// Convenience function to create an error for a malformed metadata sub-block.
pub fn metadata_error<T>(desc: &'static str) -> Result<T> {
    decode_error(desc)
}

/// Convenience function to create an unsupported version error.
pub fn unsupported_version_error<T>() -> Result<T> {
    unsupported_error(UNSUPPORTED_VERSION)
}

/// Convenience function to create an error for a source that is not a WavPack stream.
pub fn incompatible_error<T>(desc: &'static str) -> Result<T> {
    unsupported_error(desc)
}
