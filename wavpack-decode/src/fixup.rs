// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Final reconstruction of decorrelated samples.

use crate::header::{BYTES_STORED, FLOAT_DATA, HYBRID_FLAG, INT32_DATA, SHIFT_LSB, SHIFT_MASK};

/// Parameters of a block of floating point data.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FloatInfo {
    pub flags: u8,
    pub shift: u8,
    pub max_exp: u8,
    pub norm_exp: u8,
}

// Float info flags.
pub const FLOAT_SHIFT_ONES: u8 = 1;
pub const FLOAT_SHIFT_SAME: u8 = 2;
pub const FLOAT_SHIFT_SENT: u8 = 4;
pub const FLOAT_ZEROS_SENT: u8 = 8;
pub const FLOAT_NEG_ZEROS: u8 = 0x10;
pub const FLOAT_EXCEPTIONS: u8 = 0x20;

impl FloatInfo {
    /// Returns true if exact reconstruction needs data the main bitstream does not carry.
    pub fn is_lossy(&self) -> bool {
        self.flags & (FLOAT_EXCEPTIONS | FLOAT_ZEROS_SENT | FLOAT_SHIFT_SENT | FLOAT_SHIFT_SAME)
            != 0
    }
}

/// Parameters of a block of integer data wider than 24 bits or with trivial low bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Int32Info {
    pub sent_bits: u8,
    pub zeros: u8,
    pub ones: u8,
    pub dups: u8,
}

impl Int32Info {
    /// Returns true if exact reconstruction needs data the main bitstream does not carry.
    pub fn is_lossy(&self) -> bool {
        self.sent_bits != 0
    }
}

/// Shifts left. Every bit is shifted out by a shift of 32 or more.
#[inline(always)]
fn shl_saturating(value: i32, shift: u32) -> i32 {
    value.checked_shl(shift).unwrap_or(0)
}

/// Shifts right, extending the sign. Every bit is shifted out by a shift of 32 or more.
#[inline(always)]
fn shr_saturating(value: i32, shift: u32) -> i32 {
    value.checked_shr(shift).unwrap_or(value >> 31)
}

/// Rescales float data to 24-bit integers.
fn float_values(info: &FloatInfo, values: &mut [i32]) {
    let shift = (i32::from(info.max_exp) - i32::from(info.norm_exp) + i32::from(info.shift))
        .clamp(-32, 32);

    for value in values.iter_mut() {
        if shift > 0 {
            *value = shl_saturating(*value, shift as u32);
        }
        else if shift < 0 {
            *value = shr_saturating(*value, (-shift) as u32);
        }

        *value = (*value).clamp(-8_388_608, 8_388_607);
    }
}

/// Restores the scale of decoded values in place.
///
/// `values` holds every value of the decoded samples, interleaved for stereo.
pub fn fixup_samples(flags: u32, float: &FloatInfo, int32: &Int32Info, values: &mut [i32]) {
    let mut shift = (flags & SHIFT_MASK) >> SHIFT_LSB;

    if flags & FLOAT_DATA != 0 {
        // Float blocks are fully scaled by the rescale.
        float_values(float, values);
        return;
    }

    if flags & INT32_DATA != 0 {
        let Int32Info { sent_bits, zeros, ones, dups } = *int32;

        if flags & HYBRID_FLAG == 0 && sent_bits == 0 && (zeros | ones | dups) != 0 {
            for value in values.iter_mut() {
                let v = *value;

                *value = if zeros != 0 {
                    shl_saturating(v, u32::from(zeros))
                }
                else if ones != 0 {
                    shl_saturating(v.wrapping_add(1), u32::from(ones)).wrapping_sub(1)
                }
                else {
                    shl_saturating(v.wrapping_add(v & 1), u32::from(dups)).wrapping_sub(v & 1)
                };
            }
        }
        else {
            shift += u32::from(zeros) + u32::from(sent_bits) + u32::from(ones) + u32::from(dups);
        }
    }

    if flags & HYBRID_FLAG != 0 {
        let (min_bound, max_bound) = match flags & BYTES_STORED {
            0 => (-128, 127),
            1 => (-32_768, 32_767),
            2 => (-8_388_608, 8_388_607),
            _ => (i32::MIN, i32::MAX),
        };

        let min_value = shr_saturating(min_bound, shift);
        let max_value = shr_saturating(max_bound, shift);
        let min_shifted = shl_saturating(min_value, shift);
        let max_shifted = shl_saturating(max_value, shift);

        for value in values.iter_mut() {
            *value = if *value < min_value {
                min_shifted
            }
            else if *value > max_value {
                max_shifted
            }
            else {
                shl_saturating(*value, shift)
            };
        }
    }
    else if shift != 0 {
        for value in values.iter_mut() {
            *value = shl_saturating(*value, shift);
        }
    }
}

/// Converts one mid/side pair, stored in the left and right slots, back to left and right.
#[inline(always)]
pub fn recombine_mid_side(frame: &mut [i32]) {
    frame[1] = frame[1].wrapping_sub(frame[0] >> 1);
    frame[0] = frame[0].wrapping_add(frame[1]);
}

/// Duplicates `count` mono values at the start of `buf` into interleaved stereo pairs.
pub fn expand_false_stereo(buf: &mut [i32], count: usize) {
    for i in (0..count).rev() {
        let value = buf[i];
        buf[2 * i] = value;
        buf[2 * i + 1] = value;
    }
}
