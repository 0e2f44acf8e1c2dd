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

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use tk_go::NUM_MOVES;

use crate::factory::ModelFactory;
use crate::features::FeatureDescriptor;
use crate::loader::ModelDefinition;
use crate::model::{Model, ModelInput, ModelOutput};
use crate::Error;

/// A backend that draws its outputs from a normal distribution, the policy
/// is softmax normalized and the value clamped to `[-1, +1]`.
pub struct RandomModel {
    name: String,
    descriptor: FeatureDescriptor,
    policy_stddev: f32,
    value_stddev: f32,
    rng: StdRng
}

impl RandomModel {
    /// Returns a random model with the given seed and standard deviations.
    ///
    /// # Arguments
    ///
    /// * `name` -
    /// * `descriptor` -
    /// * `seed` -
    /// * `policy_stddev` -
    /// * `value_stddev` -
    ///
    pub fn new<S: Into<String>>(
        name: S,
        descriptor: FeatureDescriptor,
        seed: u64,
        policy_stddev: f32,
        value_stddev: f32
    ) -> RandomModel
    {
        RandomModel {
            name: name.into(),
            descriptor,
            policy_stddev,
            value_stddev,
            rng: StdRng::seed_from_u64(seed)
        }
    }
}

impl Model for RandomModel {
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
        assert_eq!(inputs.len(), outputs.len());
        assert!(!inputs.is_empty());

        let policy = Normal::new(0.0, self.policy_stddev as f64)
            .map_err(|reason| Error::Backend(reason.to_string()))?;
        let value = Normal::new(0.0, self.value_stddev as f64)
            .map_err(|reason| Error::Backend(reason.to_string()))?;

        for output in outputs.iter_mut() {
            for i in 0..NUM_MOVES {
                output.policy[i] = policy.sample(&mut self.rng) as f32;
            }

            softmax(&mut output.policy);
            output.value = (value.sample(&mut self.rng) as f32).max(-1.0).min(1.0);
        }

        if let Some(model_name) = model_name {
            *model_name = self.name.clone();
        }

        Ok(())
    }
}

/// Normalizes the given logits in-place so that they are positive and sum
/// to one.
///
/// # Arguments
///
/// * `logits` -
///
pub(crate) fn softmax(logits: &mut [f32]) {
    let max_logit = logits.iter().cloned().fold(::std::f32::NEG_INFINITY, f32::max);
    let mut total = 0.0;

    for logit in logits.iter_mut() {
        *logit = (*logit - max_logit).exp();
        total += *logit;
    }

    let recip = total.recip();

    for logit in logits.iter_mut() {
        *logit *= recip;
    }
}

/// Factory for the `random` engine.
pub struct RandomModelFactory;

impl ModelFactory for RandomModelFactory {
    fn new_model(&self, definition: &ModelDefinition) -> Result<Box<dyn Model>, Error> {
        let descriptor = FeatureDescriptor::from_metadata(
            &definition.metadata.input_features,
            &definition.metadata.input_layout
        )?;
        let seed = if definition.model_bytes.len() >= 8 {
            let mut buf = [0; 8];
            buf.copy_from_slice(&definition.model_bytes[..8]);

            u64::from_le_bytes(buf)
        } else {
            rand::thread_rng().gen()
        };

        Ok(Box::new(RandomModel::new(
            definition.path.display().to_string(),
            descriptor,
            seed,
            0.4,
            0.4
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Layout;
    use tk_go::symmetry::Transform;
    use tk_go::Position;

    #[test]
    fn policy_sums_to_one() {
        let mut model = RandomModel::new("random", FeatureDescriptor::agz(Layout::Nhwc), 1, 0.4, 0.4);
        let position = Position::new();
        let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
        let mut outputs = vec! [ModelOutput::default()];

        model.run_many(&inputs, &mut outputs, None).unwrap();

        let total = outputs[0].policy.iter().sum::<f32>();

        assert!((total - 1.0).abs() < 1e-4, "total is {}", total);
        assert!(outputs[0].value >= -1.0 && outputs[0].value <= 1.0);
    }

    #[test]
    fn same_seed_same_outputs() {
        let position = Position::new();
        let mut outputs = [vec! [ModelOutput::default()], vec! [ModelOutput::default()]];

        for outputs in outputs.iter_mut() {
            let mut model = RandomModel::new("random", FeatureDescriptor::agz(Layout::Nhwc), 7, 0.4, 0.4);
            let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];

            model.run_many(&inputs, outputs, None).unwrap();
        }

        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn softmax_normalizes() {
        let mut logits = vec! [1.0, 2.0, 3.0];

        softmax(&mut logits);

        assert!((logits.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(logits[2] > logits[1] && logits[1] > logits[0]);
    }
}
