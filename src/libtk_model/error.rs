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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tensor shape {actual:?}, expected {expected:?}")]
    InvalidTensorShape { expected: Vec<usize>, actual: Vec<usize> },

    #[error("unsupported input type `{0}`")]
    UnsupportedInputType(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("malformed model file: {0}")]
    MalformedModel(String),

    #[error("unknown engine `{0}`")]
    UnknownEngine(String),

    #[error("model is for a {actual}x{actual} board, expected {expected}x{expected}")]
    BoardSizeMismatch { expected: usize, actual: usize },

    #[error("invalid generation pattern `{0}`")]
    InvalidPattern(String),

    #[error("invalid model descriptor `{0}`")]
    InvalidDescriptor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed model metadata: {0}")]
    Metadata(#[from] serde_json::Error)
}
