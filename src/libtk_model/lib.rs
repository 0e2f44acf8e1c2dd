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

extern crate crossbeam_channel;
extern crate dashmap;
#[macro_use] extern crate lazy_static;
#[macro_use] extern crate log;
extern crate lru;
extern crate rand;
extern crate rand_distr;
extern crate regex;
extern crate serde;
extern crate serde_json;
extern crate thiserror;
extern crate tk_go;
extern crate tk_utils;

/* -------- Modules -------- */

pub mod batching;
pub mod buffered;
pub mod cache;
pub mod dense;
mod error;
pub mod factory;
pub mod fake;
pub mod features;
pub mod loader;
mod model;
pub mod random;
pub mod reloading;
pub mod tensor;

/* -------- Exports -------- */

pub use self::batching::{BatchingClient, BatchingFactory, ModelBatcher};
pub use self::buffered::BufferedModel;
pub use self::cache::{BasicCache, CacheStats, Key, ShardedCache};
pub use self::error::Error;
pub use self::features::{FeatureDescriptor, Layout};
pub use self::loader::{Metadata, ModelDefinition};
pub use self::model::{Model, ModelInput, ModelOutput, MAX_HISTORY};
pub use self::reloading::{ReloadingModel, ReloadingModelFactory};
