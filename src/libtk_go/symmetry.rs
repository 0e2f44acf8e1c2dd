// Copyright 2018 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
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

use crate::{Point, NUM_POINTS, SIZE};

/// One of the eight transforms in the dihedral group of the square board,
/// four rotations times two reflections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity = 0,
    FlipLR = 1,
    FlipUD = 2,
    Transpose = 3,
    TransposeAnti = 4,
    Rot90 = 5,
    Rot180 = 6,
    Rot270 = 7
}

/// All eight transforms, in discriminant order.
pub const ALL: [Transform; 8] = [
    Transform::Identity,
    Transform::FlipLR,
    Transform::FlipUD,
    Transform::Transpose,
    Transform::TransposeAnti,
    Transform::Rot90,
    Transform::Rot180,
    Transform::Rot270
];

lazy_static! {
    /// Lookup tables from source index to destination index, one per
    /// transform.
    static ref TABLES: Vec<Vec<u16>> = {
        ALL.iter()
            .map(|&transform| {
                (0..NUM_POINTS)
                    .map(|index| {
                        let point = Point::from_index(index);
                        let (x, y) = transform.map(point.x(), point.y());

                        Point::new(x, y).index() as u16
                    })
                    .collect()
            })
            .collect()
    };

    /// Composition table such that `COMPOSE[a][b] = a ∘ b`, i.e. applying
    /// `b` first and then `a`.
    static ref COMPOSE: Vec<Vec<Transform>> = {
        ALL.iter()
            .map(|&a| {
                ALL.iter()
                    .map(|&b| {
                        let probe = Point::new(1, 2);
                        let expected = a.apply(b.apply(probe));

                        *ALL.iter()
                            .find(|t| t.apply(probe) == expected && {
                                let probe_2 = Point::new(3, 5);

                                t.apply(probe_2) == a.apply(b.apply(probe_2))
                            })
                            .expect("composition is not in the group")
                    })
                    .collect()
            })
            .collect()
    };
}

impl Transform {
    /// Returns the coordinates produced by applying this transform to the
    /// given coordinates.
    ///
    /// # Arguments
    ///
    /// * `x` -
    /// * `y` -
    ///
    fn map(self, x: usize, y: usize) -> (usize, usize) {
        let n = SIZE - 1;

        match self {
            Transform::Identity => (x, y),
            Transform::FlipLR => (n - x, y),
            Transform::FlipUD => (x, n - y),
            Transform::Transpose => (y, x),
            Transform::TransposeAnti => (n - y, n - x),
            Transform::Rot90 => (n - y, x),
            Transform::Rot180 => (n - x, n - y),
            Transform::Rot270 => (y, n - x)
        }
    }

    /// Returns the point produced by applying this transform to the given
    /// point.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    pub fn apply(self, point: Point) -> Point {
        let (x, y) = self.map(point.x(), point.y());

        Point::new(x, y)
    }

    /// Returns the lookup table from source index to destination index for
    /// this transform.
    pub fn get_table(self) -> &'static [u16] {
        &TABLES[self as usize]
    }

    /// Returns the transform that undoes this transform.
    pub fn inverse(self) -> Transform {
        match self {
            Transform::Rot90 => Transform::Rot270,
            Transform::Rot270 => Transform::Rot90,
            other => other
        }
    }

    /// Returns the transform equivalent to applying `other` first and then
    /// this transform.
    ///
    /// # Arguments
    ///
    /// * `other` -
    ///
    pub fn compose(self, other: Transform) -> Transform {
        COMPOSE[self as usize][other as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_undoes() {
        for &t in &ALL {
            for point in Point::all() {
                assert_eq!(t.inverse().apply(t.apply(point)), point);
            }
        }
    }

    #[test]
    fn compose_matches_application() {
        for &a in &ALL {
            for &b in &ALL {
                let c = a.compose(b);

                for point in Point::all() {
                    assert_eq!(c.apply(point), a.apply(b.apply(point)));
                }
            }
        }
    }

    #[test]
    fn tables_match_apply() {
        for &t in &ALL {
            let table = t.get_table();

            for point in Point::all() {
                assert_eq!(table[point.index()] as usize, t.apply(point).index());
            }
        }
    }

    #[test]
    fn identity_is_neutral() {
        for &t in &ALL {
            assert_eq!(t.compose(Transform::Identity), t);
            assert_eq!(Transform::Identity.compose(t), t);
        }
    }

    #[test]
    fn inverse_composes_to_identity() {
        for &t in &ALL {
            assert_eq!(t.compose(t.inverse()), Transform::Identity);
            assert_eq!(t.inverse().compose(t), Transform::Identity);
        }
    }
}
