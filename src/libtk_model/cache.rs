// Copyright 2020 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
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

use lru::LruCache;
use std::mem::size_of;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use tk_go::symmetry::Transform;
use tk_go::{zobrist, Color, Move, Point, Position, NUM_MOVES, NUM_POINTS};
use tk_utils::config;

use crate::model::ModelOutput;

/// A cache key for a position as seen under its canonical symmetry, so that
/// all eight dihedral views of the same board share an entry. Two keys are
/// equal only if both hashes match, the second hash is an independent
/// collision guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    cache_hash: u64,
    stone_hash: u64
}

impl Key {
    /// Returns the cache key of the given position under the given
    /// canonical symmetry. The key combines the stone layout, the side to
    /// play, whether the previous move was a pass, and every empty vertex
    /// that is illegal for the side to play.
    ///
    /// # Arguments
    ///
    /// * `prev_move` -
    /// * `canonical` -
    /// * `position` -
    ///
    pub fn new(prev_move: Option<Move>, canonical: Transform, position: &Position) -> Key {
        let table = canonical.get_table();
        let mut cache_hash = 0;
        let mut stone_hash = 0;

        for point in Point::all() {
            let other = table[point.index()] as usize;

            if let Some(color) = position.stone_at(point) {
                cache_hash ^= zobrist::STONES[color as usize - 1][other];
                stone_hash ^= zobrist::STONES_GUARD[color as usize - 1][other];
            } else if !position.is_legal(point) {
                cache_hash ^= zobrist::ILLEGAL[other];
            }
        }

        if position.to_move() == Color::White {
            cache_hash ^= *zobrist::TO_PLAY;
            stone_hash ^= *zobrist::TO_PLAY;
        }

        if prev_move == Some(Move::Pass) {
            cache_hash ^= *zobrist::PASS;
        }

        Key { cache_hash, stone_hash }
    }
}

/// Hit and miss counters of a cache. A symmetry miss is a lookup that found
/// the entry but not the requested symmetry, so the caller still has to run
/// inference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub complete_misses: u64,
    pub symmetry_misses: u64
}

/// A cached output in the canonical frame, together with the bitmask of the
/// symmetries that have been merged into it.
struct CacheElement {
    output: ModelOutput,
    valid_symmetry_bits: u8,
    num_valid_symmetries: u8
}

/// Writes the view of `src` under the transform `t` into `dst`. The pass
/// component and the value pass through unchanged.
///
/// # Arguments
///
/// * `src` -
/// * `t` -
/// * `dst` -
///
fn transform_output(src: &ModelOutput, t: Transform, dst: &mut ModelOutput) {
    let table = t.get_table();

    for index in 0..NUM_POINTS {
        dst.policy[table[index] as usize] = src.policy[index];
    }

    dst.policy[NUM_POINTS] = src.policy[NUM_POINTS];
    dst.value = src.value;
}

/// Returns the number of elements a cache with the given memory budget can
/// hold, derived from the byte cost of the key, the element, the LRU list
/// links, and the bucket overhead at a conservative load factor.
///
/// # Arguments
///
/// * `budget_mb` -
///
fn capacity_for_budget(budget_mb: usize) -> usize {
    const LOAD_FACTOR: f64 = 0.75;

    let element_size = size_of::<Key>()
        + size_of::<CacheElement>()
        + NUM_MOVES * size_of::<f32>()
        + 2 * size_of::<usize>();
    let bucket_size = size_of::<usize>() + 1;
    let per_element = element_size as f64 + bucket_size as f64 / LOAD_FACTOR;

    ((budget_mb * 1024 * 1024) as f64 / per_element) as usize
}

/// A single-threaded symmetry-aware LRU cache of inference outputs. Entries
/// are stored in the canonical frame and accumulate the running mean over
/// every merged symmetry, which averages out small network biases.
pub struct BasicCache {
    entries: LruCache<Key, CacheElement>,
    stats: CacheStats
}

impl BasicCache {
    /// Returns a cache holding at most `capacity` entries.
    ///
    /// # Arguments
    ///
    /// * `capacity` -
    ///
    pub fn new(capacity: usize) -> BasicCache {
        BasicCache {
            entries: LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one")
            ),
            stats: CacheStats::default()
        }
    }

    /// Returns a cache sized for the given memory budget (in MB).
    ///
    /// # Arguments
    ///
    /// * `budget_mb` -
    ///
    pub fn with_memory_budget(budget_mb: usize) -> BasicCache {
        BasicCache::new(capacity_for_budget(budget_mb))
    }

    /// Returns the maximum number of entries this cache can hold.
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Returns the number of entries currently in this cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if this cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the hit and miss counters of this cache.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Looks up the given key and, if the requested symmetry has been
    /// merged into the entry, writes the cached output (in the caller's
    /// frame) into `out` and returns true. A hit freshens the entry in the
    /// LRU order.
    ///
    /// # Arguments
    ///
    /// * `key` -
    /// * `canonical` - the canonical symmetry of the calling game
    /// * `inference` - the symmetry of the inference request
    /// * `out` -
    ///
    pub fn try_get(
        &mut self,
        key: &Key,
        canonical: Transform,
        inference: Transform,
        out: &mut ModelOutput
    ) -> bool
    {
        let t = to_canonical(canonical, inference);
        let bit = 1u8 << (t as u8);

        match self.entries.get(key) {
            None => {
                self.stats.complete_misses += 1;
                false
            },
            Some(element) if element.valid_symmetry_bits & bit == 0 => {
                self.stats.symmetry_misses += 1;
                false
            },
            Some(element) => {
                transform_output(&element.output, t, out);
                self.stats.hits += 1;
                true
            }
        }
    }

    /// Merges the output in `inout` into the entry for the given key, and
    /// writes the merged output (in the caller's frame) back into `inout`.
    /// Merging a symmetry that is already part of the entry leaves the
    /// entry unchanged. Inserting into a full cache evicts the least
    /// recently used entry.
    ///
    /// # Arguments
    ///
    /// * `key` -
    /// * `canonical` - the canonical symmetry of the calling game
    /// * `inference` - the symmetry of the inference request
    /// * `inout` -
    ///
    pub fn merge(
        &mut self,
        key: Key,
        canonical: Transform,
        inference: Transform,
        inout: &mut ModelOutput
    )
    {
        let t = to_canonical(canonical, inference);
        let bit = 1u8 << (t as u8);

        if let Some(element) = self.entries.get_mut(&key) {
            debug_assert_eq!(
                element.valid_symmetry_bits.count_ones() as u8,
                element.num_valid_symmetries
            );

            if element.valid_symmetry_bits & bit == 0 {
                let mut incoming = ModelOutput::default();

                transform_output(inout, t.inverse(), &mut incoming);

                // fold the new view into the running mean
                let n = element.num_valid_symmetries as f32;

                for i in 0..NUM_MOVES {
                    element.output.policy[i] =
                        (n * element.output.policy[i] + incoming.policy[i]) / (n + 1.0);
                }

                element.output.value = (n * element.output.value + incoming.value) / (n + 1.0);
                element.valid_symmetry_bits |= bit;
                element.num_valid_symmetries += 1;
            }

            transform_output(&element.output, t, inout);
        } else {
            let mut stored = ModelOutput::default();

            transform_output(inout, t.inverse(), &mut stored);
            self.entries.push(key, CacheElement {
                output: stored,
                valid_symmetry_bits: bit,
                num_valid_symmetries: 1
            });
        }
    }

    /// Removes every entry from this cache.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Returns the symmetry that converts an output taken with the given
/// inference symmetry into the canonical frame of the calling game. Its
/// discriminant doubles as the entry's symmetry bit index.
fn to_canonical(canonical: Transform, inference: Transform) -> Transform {
    inference.compose(canonical.inverse())
}

/// A thread-safe symmetry-aware LRU cache, sharded so that concurrent
/// callers mostly take different locks. A key's shard is selected by its
/// primary hash, and the total capacity is split evenly across the shards
/// with any remainder going to the low shards.
pub struct ShardedCache {
    shards: Vec<Mutex<BasicCache>>
}

impl ShardedCache {
    /// Returns a cache holding at most `capacity` entries across the given
    /// number of shards.
    ///
    /// # Arguments
    ///
    /// * `capacity` -
    /// * `num_shards` -
    ///
    pub fn new(capacity: usize, num_shards: usize) -> ShardedCache {
        assert!(num_shards >= 1);

        ShardedCache {
            shards: (0..num_shards)
                .map(|i| {
                    let shard_capacity = capacity / num_shards
                        + if i < capacity % num_shards { 1 } else { 0 };

                    Mutex::new(BasicCache::new(shard_capacity))
                })
                .collect()
        }
    }

    /// Returns a cache sized for the given memory budget (in MB).
    ///
    /// # Arguments
    ///
    /// * `budget_mb` -
    /// * `num_shards` -
    ///
    pub fn with_memory_budget(budget_mb: usize, num_shards: usize) -> ShardedCache {
        ShardedCache::new(capacity_for_budget(budget_mb), num_shards)
    }

    /// Returns a cache sized from the process configuration.
    pub fn from_config() -> ShardedCache {
        ShardedCache::with_memory_budget(*config::CACHE_SIZE_MB, *config::CACHE_SHARDS)
    }

    /// Returns the maximum number of entries this cache can hold.
    pub fn capacity(&self) -> usize {
        self.shards.iter()
            .map(|shard| shard.lock().expect("could not acquire shard lock").capacity())
            .sum()
    }

    /// Returns the aggregated hit and miss counters over every shard.
    pub fn stats(&self) -> CacheStats {
        self.shards.iter()
            .map(|shard| shard.lock().expect("could not acquire shard lock").stats())
            .fold(CacheStats::default(), |mut total, stats| {
                total.hits += stats.hits;
                total.complete_misses += stats.complete_misses;
                total.symmetry_misses += stats.symmetry_misses;
                total
            })
    }

    /// See `BasicCache::try_get`.
    pub fn try_get(
        &self,
        key: &Key,
        canonical: Transform,
        inference: Transform,
        out: &mut ModelOutput
    ) -> bool
    {
        self.shard(key).lock()
            .expect("could not acquire shard lock")
            .try_get(key, canonical, inference, out)
    }

    /// See `BasicCache::merge`.
    pub fn merge(
        &self,
        key: Key,
        canonical: Transform,
        inference: Transform,
        inout: &mut ModelOutput
    )
    {
        self.shard(&key).lock()
            .expect("could not acquire shard lock")
            .merge(key, canonical, inference, inout)
    }

    /// Clears every shard in order, each under its own lock. This is not
    /// atomic across shards, concurrent merges may interleave.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().expect("could not acquire shard lock").clear();
        }
    }

    fn shard(&self, key: &Key) -> &Mutex<BasicCache> {
        &self.shards[(key.cache_hash % self.shards.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tk_go::symmetry;

    fn output_with(value: f32, point: Point, probability: f32) -> ModelOutput {
        let mut out = ModelOutput::default();

        out.value = value;
        out.policy[point.index()] = probability;
        out
    }

    fn key_of(index: usize) -> Key {
        // synthetic keys, the key constructor is exercised separately
        Key { cache_hash: index as u64, stone_hash: !(index as u64) }
    }

    #[test]
    fn merge_then_get_round_trips() {
        let mut cache = BasicCache::new(8);
        let mut stored = output_with(0.5, Point::new(3, 4), 1.0);
        let expected = stored.clone();

        cache.merge(key_of(1), Transform::Rot90, Transform::FlipLR, &mut stored);

        let mut fetched = ModelOutput::default();

        assert!(cache.try_get(&key_of(1), Transform::Rot90, Transform::FlipLR, &mut fetched));
        assert_eq!(fetched, expected);
        assert_eq!(stored, expected);
    }

    #[test]
    fn symmetry_miss_is_not_a_hit() {
        let mut cache = BasicCache::new(8);
        let mut stored = output_with(0.5, Point::new(3, 4), 1.0);

        cache.merge(key_of(1), Transform::Identity, Transform::Identity, &mut stored);

        let mut fetched = ModelOutput::default();

        assert!(!cache.try_get(&key_of(1), Transform::Identity, Transform::Rot90, &mut fetched));
        assert!(!cache.try_get(&key_of(2), Transform::Identity, Transform::Identity, &mut fetched));
        assert_eq!(cache.stats().symmetry_misses, 1);
        assert_eq!(cache.stats().complete_misses, 1);
    }

    #[test]
    fn merging_all_symmetries_preserves_symmetric_output() {
        // an output that is invariant under every transform stays bitwise
        // identical no matter how many views are folded in
        let mut cache = BasicCache::new(8);
        let mut uniform = ModelOutput::default();

        for i in 0..NUM_MOVES {
            uniform.policy[i] = 0.25;
        }
        uniform.value = 0.75;

        for &t in &symmetry::ALL {
            let mut inout = uniform.clone();

            cache.merge(key_of(1), Transform::Identity, t, &mut inout);
            assert_eq!(inout, uniform);
        }

        let mut fetched = ModelOutput::default();

        assert!(cache.try_get(&key_of(1), Transform::Identity, Transform::Rot270, &mut fetched));
        assert_eq!(fetched, uniform);
    }

    #[test]
    fn duplicate_symmetry_does_not_skew_the_mean() {
        let mut cache = BasicCache::new(8);
        let mut first = output_with(1.0, Point::new(0, 0), 1.0);

        cache.merge(key_of(1), Transform::Identity, Transform::Identity, &mut first);

        // merging the same symmetry again must not double count
        let mut again = output_with(-1.0, Point::new(0, 0), 0.0);

        cache.merge(key_of(1), Transform::Identity, Transform::Identity, &mut again);
        assert_eq!(again.value, 1.0);
        assert_eq!(again.policy[0], 1.0);
    }

    #[test]
    fn full_cache_evicts_the_least_recently_used() {
        let mut cache = BasicCache::new(2);
        let mut out = ModelOutput::default();

        cache.merge(key_of(1), Transform::Identity, Transform::Identity, &mut out.clone());
        cache.merge(key_of(2), Transform::Identity, Transform::Identity, &mut out.clone());
        cache.merge(key_of(3), Transform::Identity, Transform::Identity, &mut out.clone());

        assert_eq!(cache.len(), 2);
        assert!(!cache.try_get(&key_of(1), Transform::Identity, Transform::Identity, &mut out));
        assert!(cache.try_get(&key_of(2), Transform::Identity, Transform::Identity, &mut out));
        assert!(cache.try_get(&key_of(3), Transform::Identity, Transform::Identity, &mut out));
    }

    #[test]
    fn sharded_capacity_is_split_evenly() {
        let cache = ShardedCache::new(10, 4);

        assert_eq!(cache.capacity(), 10);

        let lens = cache.shards.iter()
            .map(|shard| shard.lock().unwrap().capacity())
            .collect::<Vec<_>>();

        assert_eq!(lens, vec! [3, 3, 2, 2]);
    }

    #[test]
    fn clear_empties_every_shard() {
        let cache = ShardedCache::new(16, 4);
        let mut out = ModelOutput::default();

        for i in 0..8 {
            cache.merge(key_of(i), Transform::Identity, Transform::Identity, &mut out);
        }

        cache.clear();

        for i in 0..8 {
            assert!(!cache.try_get(&key_of(i), Transform::Identity, Transform::Identity, &mut out));
        }
    }

    #[test]
    fn budget_capacity_is_sane() {
        let capacity = capacity_for_budget(32);

        // roughly 32 MB divided by ~1.5 KB per entry
        assert!(capacity > 10_000 && capacity < 32 * 1024 * 1024);
    }
}
