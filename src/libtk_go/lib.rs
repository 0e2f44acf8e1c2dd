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

#[macro_use] extern crate lazy_static;

mod color;
mod point;
mod position;
pub mod symmetry;
pub mod zobrist;

pub use self::color::Color;
pub use self::point::Point;
pub use self::position::{Move, Position};

/// The width (and height) of the board.
pub const SIZE: usize = 19;

/// The number of vertices on the board.
pub const NUM_POINTS: usize = SIZE * SIZE;

/// The number of candidate moves, one per vertex plus the pass move.
pub const NUM_MOVES: usize = NUM_POINTS + 1;
