// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The decorrelation filter bank.
//!
//! Each pass is an adaptive single-tap predictor. Positive terms 1 through 8 predict from the
//! sample `term` positions back in the same channel, while terms 17 and 18 extrapolate from the
//! last two samples. The negative terms are stereo only and predict each channel from the other.
//! Weights adapt by the sign of the product of prediction input and residual.

/// Maximum number of passes in a block.
pub const MAX_NTERMS: usize = 16;

/// Largest term predicting from the sample history.
pub const MAX_TERM: i32 = 8;

/// Length of the per-channel sample history.
const HISTORY_LEN: usize = MAX_TERM as usize;

/// One decorrelation pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecorrPass {
    pub term: i32,
    pub delta: i32,
    pub weight_a: i32,
    pub weight_b: i32,
    pub samples_a: [i32; HISTORY_LEN],
    pub samples_b: [i32; HISTORY_LEN],
}

/// Returns true if `term` is a valid decorrelation term.
pub fn is_valid_term(term: i32) -> bool {
    matches!(term, -3..=-1 | 1..=8 | 17 | 18)
}

/// Scales `sample` by the 10-bit fixed-point `weight`.
#[inline(always)]
pub fn apply_weight(weight: i32, sample: i32) -> i32 {
    if sample == i32::from(sample as i16) {
        (weight.wrapping_mul(sample).wrapping_add(512)) >> 10
    }
    else {
        let lo = ((sample & 0xffff).wrapping_mul(weight)) >> 9;
        let hi = ((sample & !0xffff) >> 9).wrapping_mul(weight);
        (lo.wrapping_add(hi).wrapping_add(1)) >> 1
    }
}

/// Adapts `weight` towards the sign of `source * result`. The weight is unbounded.
#[inline(always)]
pub fn update_weight(weight: i32, delta: i32, source: i32, result: i32) -> i32 {
    if source != 0 && result != 0 {
        weight.wrapping_sub(((((source ^ result) >> 30) & 2) - 1).wrapping_mul(delta))
    }
    else {
        weight
    }
}

/// Adapts `weight` like `update_weight`, limiting it to +/-1024.
#[inline(always)]
pub fn update_weight_clip(weight: i32, delta: i32, source: i32, result: i32) -> i32 {
    if source != 0 && result != 0 {
        if (source ^ result) < 0 {
            (weight - delta).max(-1024)
        }
        else {
            (weight + delta).min(1024)
        }
    }
    else {
        weight
    }
}

#[inline(always)]
fn extrapolate_17(s0: i32, s1: i32) -> i32 {
    s0.wrapping_mul(2).wrapping_sub(s1)
}

#[inline(always)]
fn extrapolate_18(s0: i32, s1: i32) -> i32 {
    s0.wrapping_mul(3).wrapping_sub(s1) >> 1
}

impl DecorrPass {
    /// Clears the sample history of both channels.
    pub fn clear_history(&mut self) {
        self.samples_a = [0; HISTORY_LEN];
        self.samples_b = [0; HISTORY_LEN];
    }

    /// Reorders the circular history after `m` steps so that slot 0 is the oldest entry again.
    fn rotate_history(&mut self, m: usize) {
        if m & (HISTORY_LEN - 1) != 0 {
            self.samples_a.rotate_left(m & (HISTORY_LEN - 1));
            self.samples_b.rotate_left(m & (HISTORY_LEN - 1));
        }
    }

    /// Runs the pass over a buffer of mono residuals. Negative terms do not apply to mono data
    /// and leave the buffer untouched.
    pub fn decorr_mono_pass(&mut self, buf: &mut [i32]) {
        match self.term {
            17 | 18 => {
                let extrapolate = if self.term == 17 { extrapolate_17 } else { extrapolate_18 };

                for s in buf.iter_mut() {
                    let sam = extrapolate(self.samples_a[0], self.samples_a[1]);
                    self.samples_a[1] = self.samples_a[0];
                    self.samples_a[0] = apply_weight(self.weight_a, sam).wrapping_add(*s);
                    self.weight_a = update_weight(self.weight_a, self.delta, sam, *s);
                    *s = self.samples_a[0];
                }
            }
            1..=MAX_TERM => {
                let mut m = 0;
                let mut k = (self.term & (MAX_TERM - 1)) as usize;

                for s in buf.iter_mut() {
                    let sam = self.samples_a[m];
                    self.samples_a[k] = apply_weight(self.weight_a, sam).wrapping_add(*s);
                    self.weight_a = update_weight(self.weight_a, self.delta, sam, *s);
                    *s = self.samples_a[k];

                    m = (m + 1) & (HISTORY_LEN - 1);
                    k = (k + 1) & (HISTORY_LEN - 1);
                }

                self.rotate_history(m);
            }
            _ => (),
        }
    }

    /// Runs the pass over a buffer of interleaved stereo residuals, carrying all state in the
    /// pass itself.
    pub fn decorr_stereo_pass(&mut self, buf: &mut [i32]) {
        match self.term {
            17 | 18 => {
                let extrapolate = if self.term == 17 { extrapolate_17 } else { extrapolate_18 };

                for frame in buf.chunks_exact_mut(2) {
                    let sam = extrapolate(self.samples_a[0], self.samples_a[1]);
                    self.samples_a[1] = self.samples_a[0];
                    self.samples_a[0] = apply_weight(self.weight_a, sam).wrapping_add(frame[0]);
                    self.weight_a = update_weight(self.weight_a, self.delta, sam, frame[0]);
                    frame[0] = self.samples_a[0];

                    let sam = extrapolate(self.samples_b[0], self.samples_b[1]);
                    self.samples_b[1] = self.samples_b[0];
                    self.samples_b[0] = apply_weight(self.weight_b, sam).wrapping_add(frame[1]);
                    self.weight_b = update_weight(self.weight_b, self.delta, sam, frame[1]);
                    frame[1] = self.samples_b[0];
                }
            }
            1..=MAX_TERM => {
                let mut m = 0;
                let mut k = (self.term & (MAX_TERM - 1)) as usize;

                for frame in buf.chunks_exact_mut(2) {
                    let sam = self.samples_a[m];
                    self.samples_a[k] = apply_weight(self.weight_a, sam).wrapping_add(frame[0]);
                    self.weight_a = update_weight(self.weight_a, self.delta, sam, frame[0]);
                    frame[0] = self.samples_a[k];

                    let sam = self.samples_b[m];
                    self.samples_b[k] = apply_weight(self.weight_b, sam).wrapping_add(frame[1]);
                    self.weight_b = update_weight(self.weight_b, self.delta, sam, frame[1]);
                    frame[1] = self.samples_b[k];

                    m = (m + 1) & (HISTORY_LEN - 1);
                    k = (k + 1) & (HISTORY_LEN - 1);
                }

                self.rotate_history(m);
            }
            -1 => {
                for frame in buf.chunks_exact_mut(2) {
                    let sam_a =
                        frame[0].wrapping_add(apply_weight(self.weight_a, self.samples_a[0]));
                    self.weight_a =
                        update_weight_clip(self.weight_a, self.delta, self.samples_a[0], frame[0]);
                    frame[0] = sam_a;

                    self.samples_a[0] = frame[1].wrapping_add(apply_weight(self.weight_b, sam_a));
                    self.weight_b = update_weight_clip(self.weight_b, self.delta, sam_a, frame[1]);
                    frame[1] = self.samples_a[0];
                }
            }
            -2 => {
                for frame in buf.chunks_exact_mut(2) {
                    let sam_b =
                        frame[1].wrapping_add(apply_weight(self.weight_b, self.samples_b[0]));
                    self.weight_b =
                        update_weight_clip(self.weight_b, self.delta, self.samples_b[0], frame[1]);
                    frame[1] = sam_b;

                    self.samples_b[0] = frame[0].wrapping_add(apply_weight(self.weight_a, sam_b));
                    self.weight_a = update_weight_clip(self.weight_a, self.delta, sam_b, frame[0]);
                    frame[0] = self.samples_b[0];
                }
            }
            -3 => {
                for frame in buf.chunks_exact_mut(2) {
                    let sam_a =
                        frame[0].wrapping_add(apply_weight(self.weight_a, self.samples_a[0]));
                    self.weight_a =
                        update_weight_clip(self.weight_a, self.delta, self.samples_a[0], frame[0]);

                    let sam_b =

                        frame[1].wrapping_add(apply_weight(self.weight_b, self.samples_b[0]));
                    self.weight_b =
                        update_weight_clip(self.weight_b, self.delta, self.samples_b[0], frame[1]);

                    self.samples_b[0] = sam_a;
                    self.samples_a[0] = sam_b;
                    frame[0] = sam_a;
                    frame[1] = sam_b;
                }
            }
            _ => (),
        }
    }

    /// Continues a stereo pass at interleaved index `start` by reading the history directly
    /// from the already-decoded samples preceding it in `buf`, then reloads the pass history
    /// from the end of the buffer.
    ///
    /// At least 8 stereo samples must precede `start`.
    pub fn decorr_stereo_pass_cont(&mut self, buf: &mut [i32], start: usize) {
        let end = buf.len() & !1;

        debug_assert!(start >= 2 * HISTORY_LEN && start <= end && start % 2 == 0);

        match self.term {
            17 | 18 => {
                let extrapolate = if self.term == 17 { extrapolate_17 } else { extrapolate_18 };

                for i in (start..end).step_by(2) {
                    let sam = extrapolate(buf[i - 2], buf[i - 4]);
                    let res = buf[i];
                    buf[i] = apply_weight(self.weight_a, sam).wrapping_add(res);
                    self.weight_a = update_weight(self.weight_a, self.delta, sam, res);

                    let sam = extrapolate(buf[i - 1], buf[i - 3]);
                    let res = buf[i + 1];
                    buf[i + 1] = apply_weight(self.weight_b, sam).wrapping_add(res);
                    self.weight_b = update_weight(self.weight_b, self.delta, sam, res);
                }

                self.samples_b[0] = buf[end - 1];
                self.samples_a[0] = buf[end - 2];
                self.samples_b[1] = buf[end - 3];
                self.samples_a[1] = buf[end - 4];
            }
            1..=MAX_TERM => {
                let offset = 2 * self.term as usize;

                for i in (start..end).step_by(2) {
                    let sam = buf[i - offset];
                    let res = buf[i];
                    buf[i] = apply_weight(self.weight_a, sam).wrapping_add(res);
                    self.weight_a = update_weight(self.weight_a, self.delta, sam, res);

                    let sam = buf[i + 1 - offset];
                    let res = buf[i + 1];
                    buf[i + 1] = apply_weight(self.weight_b, sam).wrapping_add(res);
                    self.weight_b = update_weight(self.weight_b, self.delta, sam, res);
                }

                for n in 0..HISTORY_LEN {
                    let k = ((self.term - 1 - n as i32) & (MAX_TERM - 1)) as usize;
                    self.samples_b[k] = buf[end - 1 - 2 * n];
                    self.samples_a[k] = buf[end - 2 - 2 * n];
                }
            }
            -1 => {
                for i in (start..end).step_by(2) {
                    let res = buf[i];
                    buf[i] = apply_weight(self.weight_a, buf[i - 1]).wrapping_add(res);
                    self.weight_a = update_weight_clip(self.weight_a, self.delta, buf[i - 1], res);

                    let res = buf[i + 1];
                    buf[i + 1] = apply_weight(self.weight_b, buf[i]).wrapping_add(res);
                    self.weight_b = update_weight_clip(self.weight_b, self.delta, buf[i], res);
                }

                self.samples_a[0] = buf[end - 1];
            }
            -2 => {
                for i in (start..end).step_by(2) {
                    let res = buf[i + 1];
                    buf[i + 1] = apply_weight(self.weight_b, buf[i - 2]).wrapping_add(res);
                    self.weight_b = update_weight_clip(self.weight_b, self.delta, buf[i - 2], res);

                    let res = buf[i];
                    buf[i] = apply_weight(self.weight_a, buf[i + 1]).wrapping_add(res);
                    self.weight_a = update_weight_clip(self.weight_a, self.delta, buf[i + 1], res);
                }

                self.samples_b[0] = buf[end - 2];
            }
            -3 => {
                for i in (start..end).step_by(2) {
                    let res = buf[i];
                    buf[i] = apply_weight(self.weight_a, buf[i - 1]).wrapping_add(res);
                    self.weight_a = update_weight_clip(self.weight_a, self.delta, buf[i - 1], res);

                    let res = buf[i + 1];
                    buf[i + 1] = apply_weight(self.weight_b, buf[i - 2]).wrapping_add(res);
                    self.weight_b = update_weight_clip(self.weight_b, self.delta, buf[i - 2], res);
                }

                self.samples_a[0] = buf[end - 1];
                self.samples_b[0] = buf[end - 2];
            }
            _ => (),
        }
    }
}

/// Runs every pass, in order, over a buffer of mono residuals.
pub fn decorr_mono(passes: &mut [DecorrPass], buf: &mut [i32]) {
    for dpp in passes.iter_mut() {
        dpp.decorr_mono_pass(buf);
    }
}

/// Runs every pass, in order, over a buffer of interleaved stereo residuals.
///
/// Buffers of 16 or more samples run the stateful pass over the first 8 samples and continue
/// from the buffer itself for the remainder.
pub fn decorr_stereo(passes: &mut [DecorrPass], buf: &mut [i32]) {
    let num_samples = buf.len() / 2;

    for dpp in passes.iter_mut() {
        if num_samples < 2 * HISTORY_LEN {
            dpp.decorr_stereo_pass(buf);
        }
        else {
            dpp.decorr_stereo_pass(&mut buf[..2 * HISTORY_LEN]);
            dpp.decorr_stereo_pass_cont(buf, 2 * HISTORY_LEN);
        }
    }
}
