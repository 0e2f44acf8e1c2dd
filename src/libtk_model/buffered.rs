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

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::features::FeatureDescriptor;
use crate::model::{Model, ModelInput, ModelOutput};
use crate::Error;

/// A thread-safe pool of identical models exposed through the single-model
/// interface. Each call pops an idle worker, runs it, and returns it to the
/// pool, so up to pool-size calls can execute concurrently while any excess
/// callers block.
pub struct BufferedModel {
    name: String,
    descriptor: FeatureDescriptor,
    idle_tx: Sender<Box<dyn Model>>,
    idle_rx: Receiver<Box<dyn Model>>
}

impl BufferedModel {
    /// Returns a buffered model over the given non-empty pool of workers.
    /// All of the workers must share the same name and feature descriptor.
    ///
    /// # Arguments
    ///
    /// * `models` -
    ///
    pub fn new(models: Vec<Box<dyn Model>>) -> BufferedModel {
        assert!(!models.is_empty());

        let name = models[0].name();
        let descriptor = models[0].feature_descriptor();
        let (idle_tx, idle_rx) = unbounded();

        for model in models {
            assert_eq!(model.name(), name);
            assert!(model.feature_descriptor() == descriptor);

            idle_tx.send(model).expect("could not fill the worker pool");
        }

        BufferedModel { name, descriptor, idle_tx, idle_rx }
    }
}

impl Model for BufferedModel {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn feature_descriptor(&self) -> FeatureDescriptor {
        self.descriptor
    }

    fn run_many(
        &mut self,
        inputs: &[ModelInput],
        outputs: &mut [ModelOutput],
        model_name: Option<&mut String>
    ) -> Result<(), Error>
    {
        let mut worker = self.idle_rx.recv().expect("worker pool is empty and closed");
        let result = worker.run_many(inputs, outputs, model_name);

        self.idle_tx.send(worker).expect("could not return worker to the pool");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeModel;
    use crate::features::Layout;
    use tk_go::symmetry::Transform;
    use tk_go::Position;

    fn fake(value: f32) -> Box<dyn Model> {
        Box::new(FakeModel::with_outputs(
            "pool",
            FeatureDescriptor::agz(Layout::Nhwc),
            vec! [0.0; tk_go::NUM_MOVES],
            value
        ))
    }

    #[test]
    fn round_robin() {
        let mut pool = BufferedModel::new(vec! [fake(0.25), fake(0.5)]);
        let position = Position::new();

        for _ in 0..4 {
            let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
            let mut outputs = vec! [ModelOutput::default()];

            pool.run_many(&inputs, &mut outputs, None).unwrap();

            // each worker is identical except for its fixed value
            assert!(outputs[0].value == 0.25 || outputs[0].value == 0.5);
        }
    }

    #[test]
    #[should_panic]
    fn empty_pool_is_rejected() {
        BufferedModel::new(vec! []);
    }
}
