// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entropy decoding of the residual ("words") stream.
//!
//! Each residual is coded as a ones-count selecting one of a ladder of intervals whose widths are
//! derived from three adaptive medians per channel, followed by the offset within the interval
//! and a sign bit. Long runs of zeros are coded separately while the medians are small. In hybrid
//! mode the offset is only refined down to the current error limit.

use crate::bits::BitstreamReader;
use crate::header::{HYBRID_BALANCE, HYBRID_BITRATE, HYBRID_FLAG, MONO_DATA};
use crate::tables::{count_bits, exp2s, mylog2};

const LIMIT_ONES: u32 = 16;

const SLS: u32 = 8;
const SLO: u32 = 1 << (SLS - 1);

const DIV0: u32 = 128;
const DIV1: u32 = 64;
const DIV2: u32 = 32;

/// Adaptive coder state for one channel.
#[derive(Copy, Clone, Debug, Default)]
pub struct EntropyData {
    pub median: [u32; 3],
    pub slow_level: u32,
    pub error_limit: u32,
}

impl EntropyData {
    #[inline(always)]
    fn get_med(&self, k: usize) -> u32 {
        (self.median[k] >> 4) + 1
    }

    #[inline(always)]
    fn inc_med(&mut self, k: usize) {
        let div = [DIV0, DIV1, DIV2][k];
        let m = self.median[k];
        self.median[k] = m.wrapping_add(((m.wrapping_add(div)) / div).wrapping_mul(5));
    }

    #[inline(always)]
    fn dec_med(&mut self, k: usize) {
        let div = [DIV0, DIV1, DIV2][k];
        let m = self.median[k];
        self.median[k] = m.wrapping_sub(((m.wrapping_add(div - 2)) / div).wrapping_mul(2));
    }

    #[inline(always)]
    fn decay_slow_level(&mut self) {
        self.slow_level = self.slow_level.wrapping_sub((self.slow_level.wrapping_add(SLO)) >> SLS);
    }
}

/// Entropy decoder state shared by both channels of a block.
#[derive(Clone, Debug, Default)]
pub struct WordsState {
    pub bitrate_delta: [u32; 2],
    pub bitrate_acc: [u32; 2],
    pub holding_one: u32,
    pub holding_zero: bool,
    pub zeros_acc: u32,
    pub c: [EntropyData; 2],
}

/// Reads a run length: a unary count of up-to 32 ones followed, for counts of 2 or more, by the
/// low `count - 1` bits of the value. 33 ones marks corrupt data.
fn read_run_length(bs: &mut BitstreamReader<'_>) -> Option<u32> {
    let mut cbits = 0;

    while cbits < 33 && bs.read_bit() != 0 {
        cbits += 1;
    }

    match cbits {
        33 => None,
        0 | 1 => Some(cbits),
        _ => Some(bs.read_bits_leq32(cbits - 1) | (1 << (cbits - 1))),
    }
}

/// Reads a value in `[0, maxcode]` using the fewest bits, with the short codes assigned to the
/// lowest values.
pub fn read_code(bs: &mut BitstreamReader<'_>, maxcode: u32) -> u32 {
    let bitcount = count_bits(maxcode);

    if bitcount == 0 {
        return 0;
    }

    let extras = (1u64 << bitcount) - u64::from(maxcode) - 1;
    let mut code = u64::from(bs.read_bits_leq32(bitcount - 1));

    if code >= extras {
        code = (code << 1) - extras + u64::from(bs.read_bit());
    }

    code as u32
}

fn error_limit_from(slow_log: i32, bitrate: i32) -> u32 {
    if slow_log - bitrate > -0x100 {
        exp2s(slow_log - bitrate + 0x100) as u32
    }
    else {
        0
    }
}

impl WordsState {
    /// Resets the state to the defaults used until metadata supplies the real values.
    pub fn reset(&mut self) {
        *self = WordsState::default();
    }

    fn update_error_limit(&mut self, flags: u32) {
        self.bitrate_acc[0] = self.bitrate_acc[0].wrapping_add(self.bitrate_delta[0]);
        let mut bitrate_0 = (self.bitrate_acc[0] >> 16) as i32;

        if flags & MONO_DATA != 0 {
            self.c[0].error_limit = if flags & HYBRID_BITRATE != 0 {
                let slow_log_0 = (self.c[0].slow_level.wrapping_add(SLO) >> SLS) as i32;
                error_limit_from(slow_log_0, bitrate_0)
            }
            else {
                exp2s(bitrate_0) as u32
            };
            return;
        }

        self.bitrate_acc[1] = self.bitrate_acc[1].wrapping_add(self.bitrate_delta[1]);
        let mut bitrate_1 = (self.bitrate_acc[1] >> 16) as i32;

        if flags & HYBRID_BITRATE != 0 {
            let slow_log_0 = (self.c[0].slow_level.wrapping_add(SLO) >> SLS) as i32;
            let slow_log_1 = (self.c[1].slow_level.wrapping_add(SLO) >> SLS) as i32;

            if flags & HYBRID_BALANCE != 0 {
                let balance = (slow_log_1 - slow_log_0 + bitrate_1 + 1) >> 1;

                if balance > bitrate_0 {
                    bitrate_1 = bitrate_0 * 2;
                    bitrate_0 = 0;
                }
                else if -balance > bitrate_0 {
                    bitrate_0 *= 2;
                    bitrate_1 = 0;
                }
                else {
                    bitrate_1 = bitrate_0 + balance;
                    bitrate_0 -= balance;
                }
            }

            self.c[0].error_limit = error_limit_from(slow_log_0, bitrate_0);
            self.c[1].error_limit = error_limit_from(slow_log_1, bitrate_1);
        }
        else {
            self.c[0].error_limit = exp2s(bitrate_0) as u32;
            self.c[1].error_limit = exp2s(bitrate_1) as u32;
        }
    }

    /// Decodes residuals into `out`, one per sample for mono data and two interleaved per sample
    /// otherwise, until `out` is full.
    ///
    /// Returns the number of complete samples decoded. Fewer samples than `out` can hold are
    /// returned only if corrupt data was detected.
    pub fn decode(&mut self, bs: &mut BitstreamReader<'_>, flags: u32, out: &mut [i32]) -> usize {
        let is_mono = flags & MONO_DATA != 0;
        let mut csamples = 0;

        while csamples < out.len() {
            let ch = if is_mono { 0 } else { csamples & 1 };

            if self.c[0].median[0] & !1 == 0
                && !self.holding_zero
                && self.holding_one == 0
                && self.c[1].median[0] & !1 == 0
            {
                if self.zeros_acc != 0 {
                    self.zeros_acc -= 1;

                    if self.zeros_acc != 0 {
                        self.c[ch].decay_slow_level();
                        out[csamples] = 0;
                        csamples += 1;
                        continue;
                    }
                }
                else {
                    self.zeros_acc = match read_run_length(bs) {
                        Some(run) => run,
                        None => break,
                    };

                    if self.zeros_acc != 0 {
                        self.c[ch].decay_slow_level();
                        self.c[0].median = [0; 3];
                        self.c[1].median = [0; 3];
                        out[csamples] = 0;
                        csamples += 1;
                        continue;
                    }
                }
            }

            let mut ones_count;

            if self.holding_zero {
                ones_count = 0;
                self.holding_zero = false;
            }
            else {
                ones_count = 0;
                while ones_count < LIMIT_ONES + 1 && bs.read_bit() != 0 {
                    ones_count += 1;
                }

                if ones_count == LIMIT_ONES + 1 {
                    break;
                }

                if ones_count == LIMIT_ONES {
                    ones_count = match read_run_length(bs) {
                        Some(count) => count.wrapping_add(LIMIT_ONES),
                        None => break,
                    };
                }

                if self.holding_one != 0 {
                    self.holding_one = ones_count & 1;
                    ones_count = (ones_count >> 1) + 1;
                }
                else {
                    self.holding_one = ones_count & 1;
                    ones_count >>= 1;
                }

                self.holding_zero = self.holding_one == 0;
            }

            if flags & HYBRID_FLAG != 0 && (is_mono || csamples & 1 == 0) {
                self.update_error_limit(flags);
            }

            let c = &mut self.c[ch];

            let mut low;
            let mut high;

            if ones_count == 0 {
                low = 0;
                high = c.get_med(0) - 1;
                c.dec_med(0);
            }
            else {
                low = c.get_med(0);
                c.inc_med(0);

                if ones_count == 1 {
                    high = low.wrapping_add(c.get_med(1)).wrapping_sub(1);
                    c.dec_med(1);
                }
                else {
                    low = low.wrapping_add(c.get_med(1));
                    c.inc_med(1);

                    if ones_count == 2 {
                        high = low.wrapping_add(c.get_med(2)).wrapping_sub(1);
                        c.dec_med(2);
                    }
                    else {
                        low = low.wrapping_add((ones_count - 2).wrapping_mul(c.get_med(2)));
                        high = low.wrapping_add(c.get_med(2)).wrapping_sub(1);
                        c.inc_med(2);
                    }
                }
            }

            let mut mid = high.wrapping_add(low).wrapping_add(1) >> 1;

            if c.error_limit == 0 {
                mid = read_code(bs, high.wrapping_sub(low)).wrapping_add(low);
            }
            else {
                while high.wrapping_sub(low) > c.error_limit {
                    if bs.read_bit() != 0 {
                        low = mid;
                    }
                    else {
                        high = mid.wrapping_sub(1);
                    }
                    mid = high.wrapping_add(low).wrapping_add(1) >> 1;
                }
            }

            out[csamples] = if bs.read_bit() != 0 { !(mid as i32) } else { mid as i32 };
            csamples += 1;

            if flags & HYBRID_BITRATE != 0 {
                let decay = c.slow_level.wrapping_add(SLO) >> SLS;
                c.slow_level = c.slow_level.wrapping_sub(decay).wrapping_add(mylog2(mid));
            }
        }

        if is_mono {
            csamples
        }
        else {
            csamples / 2
        }
    }
}
