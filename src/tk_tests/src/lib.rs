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

//! End-to-end tests of the inference serving core that cross crate
//! boundaries, batching under concurrent games, paired evaluation games,
//! model generation reloads, and the symmetry-aware inference cache.

#[cfg(test)] mod reloading_test;

#[cfg(test)]
pub(crate) fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}
