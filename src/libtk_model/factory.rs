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

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffered::BufferedModel;
use crate::dense::DenseModelFactory;
use crate::fake::FakeModelFactory;
use crate::features::{FeatureDescriptor, Layout};
use crate::loader::{self, ModelDefinition};
use crate::model::Model;
use crate::random::{RandomModel, RandomModelFactory};
use crate::Error;

/// Pluggable constructor for backend models, looked up in the process-wide
/// registry by engine id.
pub trait ModelFactory: Send + Sync {
    /// Returns a new backend model for the given definition.
    ///
    /// # Arguments
    ///
    /// * `definition` -
    ///
    fn new_model(&self, definition: &ModelDefinition) -> Result<Box<dyn Model>, Error>;
}

lazy_static! {
    /// The process-wide registry of engine factories.
    static ref FACTORIES: DashMap<String, Arc<dyn ModelFactory>> = {
        let factories: DashMap<String, Arc<dyn ModelFactory>> = DashMap::new();

        factories.insert("fake".to_string(), Arc::new(FakeModelFactory));
        factories.insert("random".to_string(), Arc::new(RandomModelFactory));
        factories.insert("dense".to_string(), Arc::new(DenseModelFactory));
        factories
    };
}

/// Registers a factory for the given engine id, replacing any previous
/// factory with the same id.
///
/// # Arguments
///
/// * `engine` -
/// * `factory` -
///
pub fn register_factory(engine: &str, factory: Arc<dyn ModelFactory>) {
    FACTORIES.insert(engine.to_string(), factory);
}

/// Returns the factory registered for the given engine id, if any.
///
/// # Arguments
///
/// * `engine` -
///
pub fn lookup_factory(engine: &str) -> Option<Arc<dyn ModelFactory>> {
    FACTORIES.get(engine).map(|entry| entry.value().clone())
}

/// Reads the model file at the given path and hands it to the factory
/// registered for its engine. Engines that declare `num_replicas` greater
/// than one are wrapped in a buffered pool with one worker per replica.
///
/// # Arguments
///
/// * `path` -
///
pub fn load_model(path: &Path) -> Result<Box<dyn Model>, Error> {
    let definition = loader::read_model(path)?;
    let factory = lookup_factory(&definition.metadata.engine)
        .ok_or_else(|| Error::UnknownEngine(definition.metadata.engine.clone()))?;
    let num_replicas = definition.metadata.num_replicas.unwrap_or(1);

    if num_replicas > 1 {
        let models = (0..num_replicas)
            .map(|_| factory.new_model(&definition))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(BufferedModel::new(models)))
    } else {
        factory.new_model(&definition)
    }
}

/// A parsed factory path string of the form `<engine>,<path>` or
/// `<engine>:<device>,<path>`, where the device string is engine-specific.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub engine: String,
    pub device: String,
    pub path: PathBuf
}

impl ModelSpec {
    /// Returns the parsed form of the given descriptor string.
    ///
    /// # Arguments
    ///
    /// * `descriptor` -
    ///
    pub fn parse(descriptor: &str) -> Result<ModelSpec, Error> {
        let (head, path) = match descriptor.find(',') {
            Some(index) => (&descriptor[..index], &descriptor[index + 1..]),
            None => {
                return Err(Error::InvalidDescriptor(descriptor.to_string()));
            }
        };
        let (engine, device) = match head.find(':') {
            Some(index) => (&head[..index], &head[index + 1..]),
            None => (head, "")
        };

        if engine.is_empty() || path.is_empty() {
            return Err(Error::InvalidDescriptor(descriptor.to_string()));
        }

        Ok(ModelSpec {
            engine: engine.to_string(),
            device: device.to_string(),
            path: PathBuf::from(path)
        })
    }
}

/// Returns a model for the given descriptor string. The synthetic form
/// `random:<seed>,<policy_stddev>:<value_stddev>` constructs a random model
/// without touching the filesystem, everything else is loaded through the
/// engine registry.
///
/// # Arguments
///
/// * `descriptor` -
///
pub fn new_model_from_descriptor(descriptor: &str) -> Result<Box<dyn Model>, Error> {
    let spec = ModelSpec::parse(descriptor)?;

    if spec.engine == "random" {
        let seed = if spec.device.is_empty() {
            0
        } else {
            spec.device.parse::<u64>()
                .map_err(|_| Error::InvalidDescriptor(descriptor.to_string()))?
        };
        let stddevs = spec.path.to_string_lossy().into_owned();
        let mut parts = stddevs.splitn(2, ':');
        let policy_stddev = parts.next()
            .and_then(|part| part.parse::<f32>().ok())
            .ok_or_else(|| Error::InvalidDescriptor(descriptor.to_string()))?;
        let value_stddev = parts.next()
            .and_then(|part| part.parse::<f32>().ok())
            .ok_or_else(|| Error::InvalidDescriptor(descriptor.to_string()))?;

        Ok(Box::new(RandomModel::new(
            descriptor,
            FeatureDescriptor::agz(Layout::Nhwc),
            seed,
            policy_stddev,
            value_stddev
        )))
    } else {
        load_model(&spec.path)
    }
}
