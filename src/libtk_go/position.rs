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

use std::fmt;

use crate::zobrist;
use crate::{Color, Point, NUM_POINTS, SIZE};

/// A move played by either player, a vertex or a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Move {
    Pass,
    Play(Point)
}

/// An immutable snapshot of the board. Playing a move produces a new
/// snapshot, so a history of recent positions can be kept by cloning.
///
/// This implements the minimal rules surface that feature encoding and
/// cache keys consume, i.e. stone placement with captures, Tromp-Taylor
/// legality with the simple ko rule, and per-chain liberty counts.
#[derive(Clone)]
pub struct Position {
    vertices: [u8; NUM_POINTS],
    to_move: Color,
    last_move: Option<Move>,
    ko: Option<Point>,
    stone_hash: u64
}

impl Position {
    /// Returns an empty board with black to play.
    pub fn new() -> Position {
        Position {
            vertices: [0; NUM_POINTS],
            to_move: Color::Black,
            last_move: None,
            ko: None,
            stone_hash: 0
        }
    }

    /// Returns the color of the player whose turn it is to play.
    pub fn to_move(&self) -> Color {
        self.to_move
    }

    /// Returns the most recently played move, if any.
    pub fn last_move(&self) -> Option<Move> {
        self.last_move
    }

    /// Returns the zobrist hash of the stones on the board.
    pub fn stone_hash(&self) -> u64 {
        self.stone_hash
    }

    /// Returns the color of the stone at the given vertex, if any.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    pub fn stone_at(&self, point: Point) -> Option<Color> {
        match self.vertices[point.index()] {
            0 => None,
            1 => Some(Color::Black),
            _ => Some(Color::White)
        }
    }

    /// Returns true if the side to play can legally play at the given
    /// vertex, i.e. it is empty, it is not forbidden by the simple ko rule,
    /// and the played stone would not be a suicide.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    pub fn is_legal(&self, point: Point) -> bool {
        if self.vertices[point.index()] != 0 || self.ko == Some(point) {
            return false;
        }

        let current = self.to_move as u8;

        for other in point.neighbours() {
            let value = self.vertices[other.index()];

            // check for a direct liberty
            if value == 0 {
                return true;
            }

            // check for the following two conditions simplified into one case:
            //
            // 1. If a neighbour is friendly then we are fine if it has at
            //    least two liberties.
            // 2. If a neighbour is unfriendly then we are fine if it has less
            //    than two liberties (i.e. one).
            if (value == current) == (self.count_liberties(other) >= 2) {
                return true;
            }
        }

        false
    }

    /// Returns true if playing at the given empty vertex would immediately
    /// capture at least one opposing chain.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    pub fn would_capture(&self, point: Point) -> bool {
        debug_assert!(self.vertices[point.index()] == 0);

        let opponent = self.to_move.opposite() as u8;

        point.neighbours().any(|other| {
            self.vertices[other.index()] == opponent && self.count_liberties(other) == 1
        })
    }

    /// Returns the number of liberties of the chain that contains the given
    /// vertex, or zero if the vertex is empty.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    pub fn num_liberties(&self, point: Point) -> usize {
        if self.vertices[point.index()] == 0 {
            0
        } else {
            self.count_liberties(point)
        }
    }

    /// Calls `f` once for every stone in the chain that contains the given
    /// vertex.
    ///
    /// # Arguments
    ///
    /// * `point` -
    /// * `f` -
    ///
    pub fn for_each_in_chain<F: FnMut(Point)>(&self, point: Point, mut f: F) {
        debug_assert!(self.vertices[point.index()] != 0);

        let color = self.vertices[point.index()];
        let mut visited = [false; NUM_POINTS];
        let mut remaining = vec! [point];

        visited[point.index()] = true;

        while let Some(current) = remaining.pop() {
            f(current);

            for other in current.neighbours() {
                if self.vertices[other.index()] == color && !visited[other.index()] {
                    visited[other.index()] = true;
                    remaining.push(other);
                }
            }
        }
    }

    /// Returns the position produced by the side to play playing the given
    /// move.
    ///
    /// # Arguments
    ///
    /// * `m` -
    ///
    pub fn play(&self, m: Move) -> Position {
        let mut next = self.clone();
        let color = self.to_move;

        next.to_move = color.opposite();
        next.last_move = Some(m);
        next.ko = None;

        let point = match m {
            Move::Pass => { return next },
            Move::Play(point) => point
        };

        debug_assert!(self.is_legal(point));
        next.set_stone(point, color);

        // remove any opposing chains that are now out of liberties
        let opponent = color.opposite() as u8;
        let mut captured = vec! [];

        for other in point.neighbours() {
            if next.vertices[other.index()] == opponent && next.count_liberties(other) == 0 {
                let mut chain = vec! [];

                next.for_each_in_chain(other, |p| chain.push(p));

                for &p in &chain {
                    next.clear_stone(p, color.opposite());
                }

                captured.extend(chain);
            }
        }

        // a single captured stone whose capturer is a lone stone with a
        // single liberty re-creates the previous board, forbid the immediate
        // re-capture
        if captured.len() == 1 && next.count_liberties(point) == 1 {
            let mut chain_size = 0;
            next.for_each_in_chain(point, |_| chain_size += 1);

            if chain_size == 1 {
                next.ko = Some(captured[0]);
            }
        }

        next
    }

    /// Returns the number of distinct liberties of the chain that contains
    /// the given (non-empty) vertex.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    fn count_liberties(&self, point: Point) -> usize {
        let color = self.vertices[point.index()];
        let mut visited = [false; NUM_POINTS];
        let mut counted = [false; NUM_POINTS];
        let mut remaining = vec! [point];
        let mut count = 0;

        visited[point.index()] = true;

        while let Some(current) = remaining.pop() {
            for other in current.neighbours() {
                let value = self.vertices[other.index()];

                if value == 0 {
                    if !counted[other.index()] {
                        counted[other.index()] = true;
                        count += 1;
                    }
                } else if value == color && !visited[other.index()] {
                    visited[other.index()] = true;
                    remaining.push(other);
                }
            }
        }

        count
    }

    fn set_stone(&mut self, point: Point, color: Color) {
        debug_assert!(self.vertices[point.index()] == 0);

        self.vertices[point.index()] = color as u8;
        self.stone_hash ^= zobrist::STONES[color as usize - 1][point.index()];
    }

    fn clear_stone(&mut self, point: Point, color: Color) {
        debug_assert!(self.vertices[point.index()] == color as u8);

        self.vertices[point.index()] = 0;
        self.stone_hash ^= zobrist::STONES[color as usize - 1][point.index()];
    }
}

impl Default for Position {
    fn default() -> Position {
        Position::new()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for y in 0..SIZE {
            for x in 0..SIZE {
                let ch = match self.stone_at(Point::new(x, y)) {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None => '.'
                };

                write!(f, "{} ", ch)?;
            }

            writeln!(f)?;
        }

        write!(f, "{} to play", self.to_move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play_all(moves: &[(usize, usize)]) -> Position {
        moves.iter().fold(Position::new(), |position, &(x, y)| {
            position.play(Move::Play(Point::new(x, y)))
        })
    }

    #[test]
    fn single_stone_capture() {
        // black stones at (1, 0) and (1, 2) and (0, 1), white stone at
        // (1, 1), black captures by playing at (2, 1)
        let position = play_all(&[
            (1, 0), (1, 1),
            (1, 2), (17, 17),
            (0, 1), (16, 16)
        ]);
        let position = position.play(Move::Play(Point::new(2, 1)));

        assert_eq!(position.stone_at(Point::new(1, 1)), None);
        assert_eq!(position.stone_at(Point::new(2, 1)), Some(Color::Black));
    }

    #[test]
    fn suicide_is_illegal() {
        // white to play inside a black eye at (0, 0)
        let position = play_all(&[
            (1, 0), (17, 17),
            (0, 1), (16, 16)
        ]);

        assert_eq!(position.to_move(), Color::Black);
        let position = position.play(Move::Pass);

        assert_eq!(position.to_move(), Color::White);
        assert!(!position.is_legal(Point::new(0, 0)));
    }

    #[test]
    fn ko_is_illegal() {
        // the standard ko shape around (1, 1) and (2, 1)
        let position = play_all(&[
            (1, 0), (2, 0),
            (0, 1), (3, 1),
            (1, 2), (2, 2),
            (2, 1), (1, 1)  // white takes the ko
        ]);

        assert_eq!(position.stone_at(Point::new(2, 1)), None);
        assert!(!position.is_legal(Point::new(2, 1)), "{}", position);

        // after a move elsewhere the ko can be re-taken
        let position = position.play(Move::Play(Point::new(17, 17)));
        let position = position.play(Move::Play(Point::new(16, 16)));

        assert!(position.is_legal(Point::new(2, 1)), "{}", position);
    }

    #[test]
    fn liberty_count() {
        let position = play_all(&[(0, 0)]);

        assert_eq!(position.num_liberties(Point::new(0, 0)), 2);
        assert_eq!(position.num_liberties(Point::new(5, 5)), 0);

        let position = position.play(Move::Play(Point::new(1, 0)));

        assert_eq!(position.num_liberties(Point::new(0, 0)), 1);
    }

    #[test]
    fn would_capture() {
        let position = play_all(&[
            (1, 0), (0, 0),
            (17, 17)
        ]);

        assert_eq!(position.to_move(), Color::White);
        assert!(!position.would_capture(Point::new(5, 5)));

        let position = position.play(Move::Pass);

        // black can capture the white stone in the corner by playing (0, 1)
        assert_eq!(position.to_move(), Color::Black);
        assert!(position.would_capture(Point::new(0, 1)));
    }

    #[test]
    fn stone_hash_is_incremental() {
        let position = play_all(&[(3, 3), (15, 15)]);
        let mut expected = 0;

        expected ^= zobrist::STONES[0][Point::new(3, 3).index()];
        expected ^= zobrist::STONES[1][Point::new(15, 15).index()];

        assert_eq!(position.stone_hash(), expected);
    }
}
