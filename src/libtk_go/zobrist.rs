// Copyright 2018 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::NUM_POINTS;

/// Advances the given SplitMix64 state and returns the next value in the
/// stream.
///
/// # Arguments
///
/// * `state` -
///
fn split_mix_64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);

    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Returns `n` keys drawn from a SplitMix64 stream with the given starting
/// state.
///
/// # Arguments
///
/// * `state` -
/// * `n` -
///
fn keys(mut state: u64, n: usize) -> Vec<u64> {
    (0..n).map(|_| split_mix_64(&mut state)).collect()
}

lazy_static! {
    /// Per-point, per-color stone keys used by the primary cache hash. The
    /// first table is for black stones, the second for white.
    pub static ref STONES: [Vec<u64>; 2] = [
        keys(0x7b6d_7c4f_0ad6_96f1, NUM_POINTS),
        keys(0x36bd_2f2c_6e5e_70a3, NUM_POINTS)
    ];

    /// An independent set of per-point, per-color stone keys used by the
    /// collision-guard hash.
    pub static ref STONES_GUARD: [Vec<u64>; 2] = [
        keys(0xd400_15f4_7c6a_9d33, NUM_POINTS),
        keys(0x93d3_2b0f_41c0_8b11, NUM_POINTS)
    ];

    /// Per-point keys for empty vertices that are illegal for the side to
    /// play.
    pub static ref ILLEGAL: Vec<u64> = keys(0x16ca_ef21_75ac_303b, NUM_POINTS);

    /// Key mixed into the hashes when white is the side to play.
    pub static ref TO_PLAY: u64 = split_mix_64(&mut 0x02c1_e0a1_5d3c_7b29);

    /// Key mixed into the cache hash when the previous move was a pass.
    pub static ref PASS: u64 = split_mix_64(&mut 0x5e1b_9d07_36f8_44cd);
}
