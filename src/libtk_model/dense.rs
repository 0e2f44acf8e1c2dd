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

use tk_go::{NUM_MOVES, NUM_POINTS};

use crate::factory::ModelFactory;
use crate::features::{FeatureDescriptor, Layout};
use crate::loader::ModelDefinition;
use crate::model::{Model, ModelInput, ModelOutput};
use crate::random::softmax;
use crate::tensor::Tensor;
use crate::Error;

/// The element type of the input tensor, as declared by the `input_type`
/// metadata key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    Float,
    Bool
}

impl InputType {
    /// Returns the input type named by the given metadata value, where a
    /// missing value defaults to `float`.
    ///
    /// # Arguments
    ///
    /// * `input_type` -
    ///
    pub fn from_metadata(input_type: Option<&str>) -> Result<InputType, Error> {
        match input_type {
            None | Some("float") => Ok(InputType::Float),
            Some("bool") => Ok(InputType::Bool),
            Some(other) => Err(Error::UnsupportedInputType(other.to_string()))
        }
    }
}

/// The reference CPU backend. It reduces each feature plane to its mean
/// activation and runs the result through one dense policy head (softmax)
/// and one dense value head (tanh), with all of the weights read
/// little-endian from the model payload.
///
/// This stands in for the accelerated backend adapters, whose runtimes are
/// external collaborators.
pub struct DenseModel {
    name: String,
    descriptor: FeatureDescriptor,
    input_type: InputType,

    policy_weights: Vec<f32>,  // NUM_MOVES x num_planes
    policy_bias: Vec<f32>,     // NUM_MOVES
    value_weights: Vec<f32>,   // num_planes
    value_bias: f32,

    // scratch buffers, re-used across calls and only ever grown since some
    // backends cannot afford to re-allocate on the device
    features: Vec<f32>,
    features_bytes: Vec<u8>,
    raw_policy: Vec<f32>,
    raw_value: Vec<f32>
}

impl DenseModel {
    /// Returns the number of `f32` weights a dense model with the given
    /// descriptor expects in its payload.
    ///
    /// # Arguments
    ///
    /// * `descriptor` -
    ///
    pub fn num_weights(descriptor: &FeatureDescriptor) -> usize {
        let num_planes = descriptor.num_planes();

        NUM_MOVES * num_planes + NUM_MOVES + num_planes + 1
    }

    /// Returns a dense model with the weights decoded from the given
    /// little-endian payload.
    ///
    /// # Arguments
    ///
    /// * `name` -
    /// * `descriptor` -
    /// * `input_type` -
    /// * `bytes` -
    ///
    pub fn from_bytes<S: Into<String>>(
        name: S,
        descriptor: FeatureDescriptor,
        input_type: InputType,
        bytes: &[u8]
    ) -> Result<DenseModel, Error>
    {
        let expected = 4 * DenseModel::num_weights(&descriptor);

        if bytes.len() != expected {
            return Err(Error::MalformedModel(format!(
                "payload is {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        let mut weights = bytes.chunks_exact(4).map(|chunk| {
            let mut buf = [0; 4];
            buf.copy_from_slice(chunk);

            f32::from_le_bytes(buf)
        });

        let num_planes = descriptor.num_planes();
        let policy_weights = weights.by_ref().take(NUM_MOVES * num_planes).collect();
        let policy_bias = weights.by_ref().take(NUM_MOVES).collect();
        let value_weights = weights.by_ref().take(num_planes).collect();
        let value_bias = weights.next().expect("payload length was validated");

        Ok(DenseModel {
            name: name.into(),
            descriptor,
            input_type,
            policy_weights,
            policy_bias,
            value_weights,
            value_bias,
            features: vec! [],
            features_bytes: vec! [],
            raw_policy: vec! [],
            raw_value: vec! []
        })
    }

    /// Returns the mean activation of the given plane of the given batch
    /// element in the scratch feature buffer.
    ///
    /// # Arguments
    ///
    /// * `batch_index` -
    /// * `plane` -
    ///
    fn plane_activation(&self, batch_index: usize, plane: usize) -> f32 {
        let num_planes = self.descriptor.num_planes();
        let base = batch_index * self.descriptor.input_len();
        let mut total = 0.0;

        for point in 0..NUM_POINTS {
            let index = base + match self.descriptor.layout() {
                Layout::Nhwc => point * num_planes + plane,
                Layout::Nchw => plane * NUM_POINTS + point
            };

            total += match self.input_type {
                InputType::Float => self.features[index],
                InputType::Bool => self.features_bytes[index] as f32
            };
        }

        total / NUM_POINTS as f32
    }
}

impl Model for DenseModel {
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

        let batch_size = inputs.len();
        let num_elements = batch_size * self.descriptor.input_len();
        let shape = self.descriptor.shape(batch_size);

        // fill the input tensor, growing the scratch buffer if this is the
        // largest batch so far
        match self.input_type {
            InputType::Float => {
                if self.features.len() < num_elements {
                    self.features.resize(num_elements, 0.0);
                }

                let mut tensor = Tensor::from_shape(&shape, &mut self.features)?;
                self.descriptor.set_floats(inputs, &mut tensor)?;
            },
            InputType::Bool => {
                if self.features_bytes.len() < num_elements {
                    self.features_bytes.resize(num_elements, 0);
                }

                let mut tensor = Tensor::from_shape(&shape, &mut self.features_bytes)?;
                self.descriptor.set_bytes(inputs, &mut tensor)?;
            }
        }

        if self.raw_policy.len() < batch_size * NUM_MOVES {
            self.raw_policy.resize(batch_size * NUM_MOVES, 0.0);
        }
        if self.raw_value.len() < batch_size {
            self.raw_value.resize(batch_size, 0.0);
        }

        let num_planes = self.descriptor.num_planes();

        for i in 0..batch_size {
            let activations = (0..num_planes)
                .map(|plane| self.plane_activation(i, plane))
                .collect::<Vec<_>>();

            let policy = &mut self.raw_policy[i * NUM_MOVES..(i + 1) * NUM_MOVES];

            for j in 0..NUM_MOVES {
                let weights = &self.policy_weights[j * num_planes..(j + 1) * num_planes];

                policy[j] = self.policy_bias[j] + weights.iter()
                    .zip(activations.iter())
                    .map(|(w, a)| w * a)
                    .sum::<f32>();
            }

            softmax(policy);

            self.raw_value[i] = (self.value_bias + self.value_weights.iter()
                .zip(activations.iter())
                .map(|(w, a)| w * a)
                .sum::<f32>()).tanh();
        }

        self.descriptor.get_outputs(
            inputs,
            &self.raw_policy[..batch_size * NUM_MOVES],
            &self.raw_value[..batch_size],
            outputs
        )?;

        if let Some(model_name) = model_name {
            *model_name = self.name.clone();
        }

        Ok(())
    }
}

/// Factory for the `dense` engine.
pub struct DenseModelFactory;

impl ModelFactory for DenseModelFactory {
    fn new_model(&self, definition: &ModelDefinition) -> Result<Box<dyn Model>, Error> {
        let descriptor = FeatureDescriptor::from_metadata(
            &definition.metadata.input_features,
            &definition.metadata.input_layout
        )?;
        let input_type = InputType::from_metadata(definition.metadata.input_type.as_deref())?;
        let model = DenseModel::from_bytes(
            definition.path.display().to_string(),
            descriptor,
            input_type,
            &definition.model_bytes
        )?;

        Ok(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tk_go::symmetry::{self, Transform};
    use tk_go::{Move, Point, Position};

    fn model_with_zero_weights(descriptor: FeatureDescriptor) -> DenseModel {
        let bytes = vec! [0; 4 * DenseModel::num_weights(&descriptor)];

        DenseModel::from_bytes("dense", descriptor, InputType::Float, &bytes).unwrap()
    }

    #[test]
    fn zero_weights_give_uniform_policy() {
        let mut model = model_with_zero_weights(FeatureDescriptor::agz(Layout::Nhwc));
        let position = Position::new();
        let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
        let mut outputs = vec! [ModelOutput::default()];

        model.run_many(&inputs, &mut outputs, None).unwrap();

        assert!((outputs[0].policy[0] - 1.0 / NUM_MOVES as f32).abs() < 1e-9);
        assert_eq!(outputs[0].value, 0.0);
    }

    #[test]
    fn wrong_payload_length_is_rejected() {
        let descriptor = FeatureDescriptor::agz(Layout::Nhwc);

        assert!(DenseModel::from_bytes("dense", descriptor, InputType::Float, &[0; 12]).is_err());
    }

    #[test]
    fn outputs_match_under_inverse_symmetry() {
        let descriptor = FeatureDescriptor::agz(Layout::Nhwc);
        let num_weights = DenseModel::num_weights(&descriptor);
        let bytes = (0..num_weights)
            .flat_map(|i| (((i % 131) as f32) * 0.01 - 0.5).to_le_bytes().to_vec())
            .collect::<Vec<_>>();
        let mut model = DenseModel::from_bytes("dense", descriptor, InputType::Float, &bytes).unwrap();

        let mut position = Position::new();
        for &(x, y) in &[(2, 3), (16, 16), (4, 4)] {
            position = position.play(Move::Play(Point::new(x, y)));
        }

        let mut identity = vec! [ModelOutput::default()];
        {
            let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
            model.run_many(&inputs, &mut identity, None).unwrap();
        }

        for &t in &symmetry::ALL {
            let inputs = vec! [ModelInput::new(t, vec! [&position])];
            let mut outputs = vec! [ModelOutput::default()];

            model.run_many(&inputs, &mut outputs, None).unwrap();

            assert!((outputs[0].policy[NUM_POINTS] - identity[0].policy[NUM_POINTS]).abs() < 1e-6);

            for point in Point::all() {
                let expected = identity[0].policy[t.apply(point).index()];
                let actual = outputs[0].policy[point.index()];

                assert!((actual - expected).abs() < 1e-6, "{:?} at {:?}", t, point);
            }
        }
    }

    #[test]
    fn bool_inputs_match_float_inputs() {
        let descriptor = FeatureDescriptor::mlperf07(Layout::Nchw);
        let bytes = (0..DenseModel::num_weights(&descriptor))
            .flat_map(|i| (((i % 17) as f32) * 0.05).to_le_bytes().to_vec())
            .collect::<Vec<_>>();
        let mut as_float = DenseModel::from_bytes("dense", descriptor, InputType::Float, &bytes).unwrap();
        let mut as_bool = DenseModel::from_bytes("dense", descriptor, InputType::Bool, &bytes).unwrap();

        let position = Position::new().play(Move::Play(Point::new(3, 3)));
        let mut float_outputs = vec! [ModelOutput::default()];
        let mut bool_outputs = vec! [ModelOutput::default()];

        {
            let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
            as_float.run_many(&inputs, &mut float_outputs, None).unwrap();
        }
        {
            let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
            as_bool.run_many(&inputs, &mut bool_outputs, None).unwrap();
        }

        assert_eq!(float_outputs, bool_outputs);
    }
}
