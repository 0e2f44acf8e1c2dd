// Copyright 2019 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
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

use std::env;
use std::str::FromStr;

/// Returns the value of the environment variable with the given `name`, or
/// `default` if it is unset or fails to parse.
///
/// # Arguments
///
/// * `name` -
/// * `default` -
///
fn env_or_default<T: FromStr>(name: &str, default: T) -> T {
    env::var(name).ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

lazy_static! {
    /// The maximum number of positions that are dispatched to a backend in a
    /// single call.
    pub static ref BATCH_SIZE: usize = env_or_default("BATCH_SIZE", 96);

    /// The number of seconds between two directory scans when watching for
    /// new model generations.
    pub static ref POLL_INTERVAL: u64 = env_or_default("POLL_INTERVAL", 5);

    /// The memory budget of the inference cache (in MB).
    pub static ref CACHE_SIZE_MB: usize = env_or_default("CACHE_SIZE_MB", 256);

    /// The number of independent shards in the thread-safe inference cache.
    pub static ref CACHE_SHARDS: usize = env_or_default("CACHE_SHARDS", 8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_yields_default() {
        assert_eq!(env_or_default("TK_NO_SUCH_VARIABLE", 31), 31);
    }

    #[test]
    fn garbage_yields_default() {
        env::set_var("TK_GARBAGE_VARIABLE", "not a number");

        assert_eq!(env_or_default("TK_GARBAGE_VARIABLE", 8), 8);
    }

    #[test]
    fn set_overrides_default() {
        env::set_var("TK_SET_VARIABLE", "17");

        assert_eq!(env_or_default("TK_SET_VARIABLE", 8), 17);
    }
}
