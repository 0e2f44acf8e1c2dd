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

use tk_go::symmetry::Transform;
use tk_go::{Position, NUM_MOVES};

use crate::features::FeatureDescriptor;
use crate::Error;

/// The maximum number of recent positions a single evaluation may provide.
pub const MAX_HISTORY: usize = 8;

/// A single position to evaluate, the symmetry to apply to its features,
/// and the recent position history (most recent first).
pub struct ModelInput<'a> {
    symmetry: Transform,
    history: Vec<&'a Position>
}

impl<'a> ModelInput<'a> {
    /// Returns a new input for the given history of positions, most recent
    /// first.
    ///
    /// # Arguments
    ///
    /// * `symmetry` - the symmetry to apply to the input features
    /// * `history` - the most recent positions, current position first
    ///
    pub fn new(symmetry: Transform, history: Vec<&'a Position>) -> ModelInput<'a> {
        assert!(!history.is_empty() && history.len() <= MAX_HISTORY);

        ModelInput { symmetry, history }
    }

    /// Returns the symmetry to apply to the input features.
    pub fn symmetry(&self) -> Transform {
        self.symmetry
    }

    /// Returns the position history, current position first.
    pub fn history(&self) -> &[&'a Position] {
        &self.history
    }

    /// Returns the current position.
    pub fn position(&self) -> &Position {
        self.history[0]
    }
}

/// The result of evaluating a single position, a probability per candidate
/// move and the expected game outcome in the range `[-1, +1]` from the
/// point of view of the player to move.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelOutput {
    pub policy: Vec<f32>,
    pub value: f32
}

impl Default for ModelOutput {
    fn default() -> ModelOutput {
        ModelOutput {
            policy: vec! [0.0; NUM_MOVES],
            value: 0.0
        }
    }
}

/// A neural network backend that evaluates batches of positions. A model is
/// not required to be thread-safe, callers must serialize access to it (see
/// `BufferedModel` and `ModelBatcher`).
pub trait Model: Send {
    /// Returns a human readable name of this model, typically the path it
    /// was loaded from.
    fn name(&self) -> String;

    /// Returns the descriptor of the input features this model expects.
    fn feature_descriptor(&self) -> FeatureDescriptor;

    /// Evaluates all of the given positions and fills in one output per
    /// input. If `model_name` is given it is set to the name of the model
    /// that actually performed the evaluation, which may differ from
    /// `name()` if the model was swapped concurrently.
    ///
    /// # Arguments
    ///
    /// * `inputs` -
    /// * `outputs` -
    /// * `model_name` -
    ///
    fn run_many(
        &mut self,
        inputs: &[ModelInput],
        outputs: &mut [ModelOutput],
        model_name: Option<&mut String>
    ) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn empty_history_is_rejected() {
        ModelInput::new(Transform::Identity, vec! []);
    }

    #[test]
    fn default_output_shape() {
        let output = ModelOutput::default();

        assert_eq!(output.policy.len(), NUM_MOVES);
        assert_eq!(output.value, 0.0);
    }
}
