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

use tk_go::{Color, Point, NUM_MOVES, NUM_POINTS, SIZE};

use crate::model::{ModelInput, ModelOutput};
use crate::tensor::Tensor;
use crate::Error;

/// The number of history planes pairs in the `agz` feature set.
pub const AGZ_HISTORY: usize = 8;

/// The number of planes in the `agz` feature set, two stone planes per
/// history position plus the to-play plane.
pub const NUM_AGZ_PLANES: usize = 2 * AGZ_HISTORY + 1;

/// The number of history plane pairs in the `mlperf07` feature set.
pub const MLPERF07_HISTORY: usize = 4;

/// The number of planes in the `mlperf07` feature set, two stone planes per
/// history position, the to-play plane, three liberty planes, and the
/// would-capture plane.
pub const NUM_MLPERF07_PLANES: usize = 2 * MLPERF07_HISTORY + 5;

/// The memory layout of the input tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    Nhwc,
    Nchw
}

impl Layout {
    /// Returns the layout named by the given `input_layout` metadata value.
    ///
    /// # Arguments
    ///
    /// * `input_layout` -
    ///
    pub fn from_metadata(input_layout: &str) -> Result<Layout, Error> {
        match input_layout {
            "nhwc" => Ok(Layout::Nhwc),
            "nchw" => Ok(Layout::Nchw),
            other => Err(Error::MalformedModel(format!("unknown input layout `{}`", other)))
        }
    }
}

/// Utility trait for determining the data format of one batch element of
/// the input tensor.
pub trait Order {
    /// Returns the flat index of the given `(plane, point)` pair within one
    /// batch element.
    fn index(num_planes: usize, plane: usize, point: usize) -> usize;

    /// Returns the tensor shape for the given batch size and plane count.
    fn shape(batch_size: usize, num_planes: usize) -> [usize; 4];
}

/// Implementation of `Order` for the data format `NHWC`.
pub struct Hwc;

impl Order for Hwc {
    fn index(num_planes: usize, plane: usize, point: usize) -> usize {
        point * num_planes + plane
    }

    fn shape(batch_size: usize, num_planes: usize) -> [usize; 4] {
        [batch_size, SIZE, SIZE, num_planes]
    }
}

/// Implementation of `Order` for the data format `NCHW`.
pub struct Chw;

impl Order for Chw {
    fn index(_num_planes: usize, plane: usize, point: usize) -> usize {
        plane * NUM_POINTS + point
    }

    fn shape(batch_size: usize, num_planes: usize) -> [usize; 4] {
        [batch_size, num_planes, SIZE, SIZE]
    }
}

/// The element type of an input tensor.
pub trait Element: Copy {
    const ZERO: Self;
    const ONE: Self;
}

impl Element for u8 {
    const ZERO: u8 = 0;
    const ONE: u8 = 1;
}

impl Element for f32 {
    const ZERO: f32 = 0.0;
    const ONE: f32 = 1.0;
}

/// A compile-time description of a family of input planes.
pub trait FeatureSet {
    const NUM_PLANES: usize;

    /// Writes the feature planes of the given input into `features`, which
    /// covers exactly one (zeroed) batch element.
    ///
    /// # Arguments
    ///
    /// * `input` -
    /// * `features` -
    ///
    fn set_input<T: Element, O: Order>(input: &ModelInput, features: &mut [T]);
}

/// The `agz` feature set, `2 x 8` stone planes (current player and
/// opponent, most recent position first, zero-padded if the history is
/// shorter) plus one to-play plane (all ones for black, all zeros for
/// white).
pub struct AgzFeatures;

impl FeatureSet for AgzFeatures {
    const NUM_PLANES: usize = NUM_AGZ_PLANES;

    fn set_input<T: Element, O: Order>(input: &ModelInput, features: &mut [T]) {
        let to_move = input.position().to_move();
        let table = input.symmetry().get_table();

        for (i, position) in input.history().iter().enumerate().take(AGZ_HISTORY) {
            set_stone_planes::<T, O>(Self::NUM_PLANES, 2 * i, position, to_move, table, features);
        }

        set_to_play_plane::<T, O>(Self::NUM_PLANES, 2 * AGZ_HISTORY, to_move, features);
    }
}

/// The `mlperf07` feature set, `2 x 4` stone planes, the to-play plane,
/// three liberty planes (exactly one, exactly two, and three or more
/// liberties), and the would-capture plane.
pub struct Mlperf07Features;

impl FeatureSet for Mlperf07Features {
    const NUM_PLANES: usize = NUM_MLPERF07_PLANES;

    fn set_input<T: Element, O: Order>(input: &ModelInput, features: &mut [T]) {
        let current = input.position();
        let to_move = current.to_move();
        let table = input.symmetry().get_table();

        for (i, position) in input.history().iter().enumerate().take(MLPERF07_HISTORY) {
            set_stone_planes::<T, O>(Self::NUM_PLANES, 2 * i, position, to_move, table, features);
        }

        set_to_play_plane::<T, O>(Self::NUM_PLANES, 2 * MLPERF07_HISTORY, to_move, features);

        // liberty counts are shared by every stone in a chain, so compute
        // them once per chain
        let mut liberties = [0; NUM_POINTS];

        for point in Point::all() {
            let other = table[point.index()] as usize;

            if current.stone_at(point).is_some() {
                if liberties[point.index()] == 0 {
                    let count = current.num_liberties(point);

                    current.for_each_in_chain(point, |p| liberties[p.index()] = count);
                }

                let plane = match liberties[point.index()] {
                    1 => 9,
                    2 => 10,
                    _ => 11
                };

                features[O::index(Self::NUM_PLANES, plane, other)] = T::ONE;
            } else if current.is_legal(point) && current.would_capture(point) {
                features[O::index(Self::NUM_PLANES, 12, other)] = T::ONE;
            }
        }
    }
}

/// Writes the stone planes of a single historical position, the plane at
/// `base` for the current player and `base + 1` for the opponent.
///
/// # Arguments
///
/// * `num_planes` -
/// * `base` -
/// * `position` -
/// * `to_move` - the current player of the position being evaluated
/// * `table` - the symmetry lookup table
/// * `features` -
///
fn set_stone_planes<T: Element, O: Order>(
    num_planes: usize,
    base: usize,
    position: &tk_go::Position,
    to_move: Color,
    table: &[u16],
    features: &mut [T]
) {
    for point in Point::all() {
        if let Some(color) = position.stone_at(point) {
            let other = table[point.index()] as usize;
            let plane = if color == to_move { base } else { base + 1 };

            features[O::index(num_planes, plane, other)] = T::ONE;
        }
    }
}

/// Writes the to-play plane, all ones if black is to play and all zeros
/// otherwise.
fn set_to_play_plane<T: Element, O: Order>(
    num_planes: usize,
    plane: usize,
    to_move: Color,
    features: &mut [T]
) {
    if to_move == Color::Black {
        for point in 0..NUM_POINTS {
            features[O::index(num_planes, plane, point)] = T::ONE;
        }
    }
}

/// Writes the features of every input into the given batch tensor.
fn set_all<F: FeatureSet, T: Element, O: Order>(
    inputs: &[ModelInput],
    tensor: &mut Tensor<T>
) -> Result<(), Error>
{
    let expected = O::shape(inputs.len(), F::NUM_PLANES);

    if tensor.shape() != &expected[..] {
        return Err(Error::InvalidTensorShape {
            expected: expected.to_vec(),
            actual: tensor.shape().to_vec()
        });
    }

    let stride = F::NUM_PLANES * NUM_POINTS;
    let data = tensor.data_mut();

    for element in data.iter_mut() {
        *element = T::ZERO;
    }

    for (i, input) in inputs.iter().enumerate() {
        F::set_input::<T, O>(input, &mut data[i * stride..(i + 1) * stride]);
    }

    Ok(())
}

/// The run-time description of the input tensor a model expects, the plane
/// count, the memory layout, and monomorphized writers for byte and float
/// tensors.
#[derive(Clone, Copy)]
pub struct FeatureDescriptor {
    num_planes: usize,
    layout: Layout,
    set_bytes: fn(&[ModelInput], &mut Tensor<u8>) -> Result<(), Error>,
    set_floats: fn(&[ModelInput], &mut Tensor<f32>) -> Result<(), Error>
}

impl PartialEq for FeatureDescriptor {
    fn eq(&self, other: &FeatureDescriptor) -> bool {
        self.num_planes == other.num_planes && self.layout == other.layout
    }
}

impl FeatureDescriptor {
    /// Returns the descriptor for the given feature set and layout.
    pub fn new<F: FeatureSet>(layout: Layout) -> FeatureDescriptor {
        match layout {
            Layout::Nhwc => FeatureDescriptor {
                num_planes: F::NUM_PLANES,
                layout,
                set_bytes: set_all::<F, u8, Hwc>,
                set_floats: set_all::<F, f32, Hwc>
            },
            Layout::Nchw => FeatureDescriptor {
                num_planes: F::NUM_PLANES,
                layout,
                set_bytes: set_all::<F, u8, Chw>,
                set_floats: set_all::<F, f32, Chw>
            }
        }
    }

    /// Returns the descriptor for the `agz` feature set in the given layout.
    pub fn agz(layout: Layout) -> FeatureDescriptor {
        FeatureDescriptor::new::<AgzFeatures>(layout)
    }

    /// Returns the descriptor for the `mlperf07` feature set in the given
    /// layout.
    pub fn mlperf07(layout: Layout) -> FeatureDescriptor {
        FeatureDescriptor::new::<Mlperf07Features>(layout)
    }

    /// Returns the descriptor named by the given metadata values.
    ///
    /// # Arguments
    ///
    /// * `input_features` -
    /// * `input_layout` -
    ///
    pub fn from_metadata(input_features: &str, input_layout: &str) -> Result<FeatureDescriptor, Error> {
        let layout = Layout::from_metadata(input_layout)?;

        match input_features {
            "agz" => Ok(FeatureDescriptor::agz(layout)),
            "mlperf07" => Ok(FeatureDescriptor::mlperf07(layout)),
            other => Err(Error::MalformedModel(format!("unknown input features `{}`", other)))
        }
    }

    /// Returns the number of input planes.
    pub fn num_planes(&self) -> usize {
        self.num_planes
    }

    /// Returns the memory layout of the input tensor.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns the number of elements of one batch element of the input
    /// tensor.
    pub fn input_len(&self) -> usize {
        self.num_planes * NUM_POINTS
    }

    /// Returns the input tensor shape for the given batch size.
    pub fn shape(&self, batch_size: usize) -> [usize; 4] {
        match self.layout {
            Layout::Nhwc => Hwc::shape(batch_size, self.num_planes),
            Layout::Nchw => Chw::shape(batch_size, self.num_planes)
        }
    }

    /// Writes the features of every input into the given byte tensor.
    pub fn set_bytes(&self, inputs: &[ModelInput], tensor: &mut Tensor<u8>) -> Result<(), Error> {
        (self.set_bytes)(inputs, tensor)
    }

    /// Writes the features of every input into the given float tensor.
    pub fn set_floats(&self, inputs: &[ModelInput], tensor: &mut Tensor<f32>) -> Result<(), Error> {
        (self.set_floats)(inputs, tensor)
    }

    /// Splits the raw batched policy and value tensors into one output per
    /// input, undoing the symmetry that was applied to each input's
    /// features. The pass component of the policy is passed through
    /// unchanged.
    ///
    /// # Arguments
    ///
    /// * `inputs` -
    /// * `policy` - `batch_size x NUM_MOVES` policy values
    /// * `value` - `batch_size` values
    /// * `outputs` -
    ///
    pub fn get_outputs(
        &self,
        inputs: &[ModelInput],
        policy: &[f32],
        value: &[f32],
        outputs: &mut [ModelOutput]
    ) -> Result<(), Error>
    {
        if policy.len() != inputs.len() * NUM_MOVES || value.len() != inputs.len() {
            return Err(Error::InvalidTensorShape {
                expected: vec! [inputs.len(), NUM_MOVES],
                actual: vec! [policy.len(), value.len()]
            });
        }

        debug_assert_eq!(inputs.len(), outputs.len());

        for (i, input) in inputs.iter().enumerate() {
            let src = &policy[i * NUM_MOVES..(i + 1) * NUM_MOVES];
            let table = input.symmetry().get_table();
            let out = &mut outputs[i];

            for index in 0..NUM_POINTS {
                out.policy[index] = src[table[index] as usize];
            }

            out.policy[NUM_POINTS] = src[NUM_POINTS];
            out.value = value[i];
        }

        Ok(())
    }
}
