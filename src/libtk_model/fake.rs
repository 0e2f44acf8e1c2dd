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

use tk_go::NUM_MOVES;

use crate::factory::ModelFactory;
use crate::features::FeatureDescriptor;
use crate::loader::ModelDefinition;
use crate::model::{Model, ModelInput, ModelOutput};
use crate::Error;

/// A backend that returns the same priors and value for every position.
/// Useful as a stand-in during tests and benchmarks, it never looks at the
/// input features.
pub struct FakeModel {
    name: String,
    descriptor: FeatureDescriptor,
    priors: Vec<f32>,
    value: f32
}

impl FakeModel {
    /// Returns a fake model with uniform priors and a neutral value.
    ///
    /// # Arguments
    ///
    /// * `name` -
    /// * `descriptor` -
    ///
    pub fn new<S: Into<String>>(name: S, descriptor: FeatureDescriptor) -> FakeModel {
        FakeModel::with_outputs(
            name,
            descriptor,
            vec! [1.0 / NUM_MOVES as f32; NUM_MOVES],
            0.0
        )
    }

    /// Returns a fake model with the given fixed priors and value.
    ///
    /// # Arguments
    ///
    /// * `name` -
    /// * `descriptor` -
    /// * `priors` -
    /// * `value` -
    ///
    pub fn with_outputs<S: Into<String>>(
        name: S,
        descriptor: FeatureDescriptor,
        priors: Vec<f32>,
        value: f32
    ) -> FakeModel
    {
        assert_eq!(priors.len(), NUM_MOVES);

        FakeModel {
            name: name.into(),
            descriptor,
            priors,
            value
        }
    }
}

impl Model for FakeModel {
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

        for output in outputs.iter_mut() {
            output.policy.copy_from_slice(&self.priors);
            output.value = self.value;
        }

        if let Some(model_name) = model_name {
            *model_name = self.name.clone();
        }

        Ok(())
    }
}

/// Factory for the `fake` engine.
pub struct FakeModelFactory;

impl ModelFactory for FakeModelFactory {
    fn new_model(&self, definition: &ModelDefinition) -> Result<Box<dyn Model>, Error> {
        let descriptor = FeatureDescriptor::from_metadata(
            &definition.metadata.input_features,
            &definition.metadata.input_layout
        )?;

        Ok(Box::new(FakeModel::new(definition.path.display().to_string(), descriptor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Layout;
    use tk_go::symmetry::Transform;
    use tk_go::Position;

    #[test]
    fn returns_fixed_outputs() {
        let mut model = FakeModel::with_outputs(
            "fake",
            FeatureDescriptor::agz(Layout::Nhwc),
            vec! [0.5; NUM_MOVES],
            0.25
        );
        let position = Position::new();
        let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
        let mut outputs = vec! [ModelOutput::default()];
        let mut name = String::new();

        model.run_many(&inputs, &mut outputs, Some(&mut name)).unwrap();

        assert_eq!(outputs[0].value, 0.25);
        assert_eq!(outputs[0].policy[0], 0.5);
        assert_eq!(name, "fake");
    }
}
