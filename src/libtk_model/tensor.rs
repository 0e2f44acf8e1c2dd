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

use crate::Error;

/// The maximum number of dimensions of a `Tensor`.
pub const MAX_DIMS: usize = 4;

/// A shaped, non-owning view over a flat buffer. The backing storage is
/// borrowed from the caller so that backends can keep re-using the same
/// grow-only allocations across calls.
pub struct Tensor<'a, T> {
    shape: [usize; MAX_DIMS],
    num_dims: usize,
    data: &'a mut [T]
}

impl<'a, T> Tensor<'a, T> {
    /// Returns a tensor of the given shape over the given backing storage.
    /// Fails if the shape has more than `MAX_DIMS` dimensions, or if its
    /// element count exceeds the backing storage.
    ///
    /// # Arguments
    ///
    /// * `shape` -
    /// * `data` -
    ///
    pub fn from_shape(shape: &[usize], data: &'a mut [T]) -> Result<Tensor<'a, T>, Error> {
        if shape.len() > MAX_DIMS || shape.iter().product::<usize>() > data.len() {
            return Err(Error::InvalidTensorShape {
                expected: vec! [data.len()],
                actual: shape.to_vec()
            });
        }

        let mut out = Tensor {
            shape: [1; MAX_DIMS],
            num_dims: shape.len(),
            data
        };
        out.shape[..shape.len()].copy_from_slice(shape);

        Ok(out)
    }

    /// Returns the shape of this tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape[..self.num_dims]
    }

    /// Returns the number of elements covered by the shape of this tensor.
    pub fn element_count(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the elements covered by the shape of this tensor.
    pub fn data(&self) -> &[T] {
        &self.data[..self.element_count()]
    }

    /// Returns the elements covered by the shape of this tensor.
    pub fn data_mut(&mut self) -> &mut [T] {
        let count = self.element_count();

        &mut self.data[..count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_fit_storage() {
        let mut storage = vec! [0.0f32; 8];

        assert!(Tensor::from_shape(&[2, 4], &mut storage).is_ok());
        assert!(Tensor::from_shape(&[3, 3], &mut storage).is_err());
    }

    #[test]
    fn too_many_dims() {
        let mut storage = vec! [0.0f32; 32];

        assert!(Tensor::from_shape(&[2, 2, 2, 2, 2], &mut storage).is_err());
    }

    #[test]
    fn data_is_truncated_to_shape() {
        let mut storage = vec! [0u8; 10];
        let tensor = Tensor::from_shape(&[2, 3], &mut storage).unwrap();

        assert_eq!(tensor.element_count(), 6);
        assert_eq!(tensor.data().len(), 6);
    }
}
