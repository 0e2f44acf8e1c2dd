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

use crate::SIZE;

/// A vertex on the board, stored as a packed index in the half-open range
/// `[0, NUM_POINTS)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    index: u16
}

impl Point {
    /// Returns the point at the given coordinates.
    ///
    /// # Arguments
    ///
    /// * `x` - the column, in the range `[0, SIZE)`
    /// * `y` - the row, in the range `[0, SIZE)`
    ///
    pub fn new(x: usize, y: usize) -> Point {
        debug_assert!(x < SIZE && y < SIZE);

        Point { index: (y * SIZE + x) as u16 }
    }

    /// Returns the point with the given packed index.
    ///
    /// # Arguments
    ///
    /// * `index` -
    ///
    pub fn from_index(index: usize) -> Point {
        debug_assert!(index < crate::NUM_POINTS);

        Point { index: index as u16 }
    }

    /// Returns the column of this point.
    pub fn x(self) -> usize {
        self.index as usize % SIZE
    }

    /// Returns the row of this point.
    pub fn y(self) -> usize {
        self.index as usize / SIZE
    }

    /// Returns the packed index of this point.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Returns the point offset by `(dx, dy)` from this point, or `None` if
    /// it would fall outside of the board.
    ///
    /// # Arguments
    ///
    /// * `dx` -
    /// * `dy` -
    ///
    pub fn offset(self, dx: isize, dy: isize) -> Option<Point> {
        let x = self.x() as isize + dx;
        let y = self.y() as isize + dy;

        if x < 0 || x >= SIZE as isize || y < 0 || y >= SIZE as isize {
            None
        } else {
            Some(Point::new(x as usize, y as usize))
        }
    }

    /// Returns an iterator over all points on the board.
    pub fn all() -> impl Iterator<Item=Point> {
        (0..crate::NUM_POINTS).map(Point::from_index)
    }

    /// Returns an iterator over the (up to four) direct neighbours of this
    /// point.
    pub fn neighbours(self) -> impl Iterator<Item=Point> {
        const CROSS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

        CROSS.iter().filter_map(move |&(dx, dy)| self.offset(dx, dy))
    }
}
