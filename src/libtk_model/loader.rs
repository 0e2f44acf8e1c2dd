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

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::Error;

/// The magic bytes at the start of every model file.
pub const MAGIC: &[u8; 8] = b"<minigo>";

/// The only supported model file version.
pub const VERSION: u64 = 1;

/// The metadata block of a model file. The required keys describe which
/// engine should load the payload and what input tensor it expects.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Metadata {
    pub engine: String,
    pub input_features: String,
    pub input_layout: String,
    pub board_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_replicas: Option<usize>
}

/// A parsed model file, the metadata plus the opaque backend-specific
/// payload.
#[derive(Clone, Debug)]
pub struct ModelDefinition {
    pub path: PathBuf,
    pub metadata: Metadata,
    pub model_bytes: Vec<u8>
}

/// Reads the next little-endian `u64` from the given reader.
fn read_u64<R: Read>(reader: &mut R) -> Result<u64, Error> {
    let mut buf = [0; 8];

    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads and validates the model file at the given path.
///
/// # Arguments
///
/// * `path` -
///
pub fn read_model(path: &Path) -> Result<ModelDefinition, Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0; 8];

    reader.read_exact(&mut magic)?;

    if &magic != MAGIC {
        return Err(Error::MalformedModel(format!("bad magic in {:?}", path)));
    }

    let version = read_u64(&mut reader)?;

    if version != VERSION {
        return Err(Error::MalformedModel(format!("unsupported version {}", version)));
    }

    let file_size = read_u64(&mut reader)?;
    let metadata_size = read_u64(&mut reader)?;
    let mut metadata_bytes = vec! [0; metadata_size as usize];

    reader.read_exact(&mut metadata_bytes)?;

    let metadata: Metadata = serde_json::from_slice(&metadata_bytes)?;

    if metadata.board_size != tk_go::SIZE {
        return Err(Error::BoardSizeMismatch {
            expected: tk_go::SIZE,
            actual: metadata.board_size
        });
    }

    let mut model_bytes = vec! [];

    reader.read_to_end(&mut model_bytes)?;

    let actual_size = 32 + metadata_size + model_bytes.len() as u64;

    if actual_size != file_size {
        return Err(Error::MalformedModel(format!(
            "file is {} bytes, header says {}",
            actual_size,
            file_size
        )));
    }

    Ok(ModelDefinition {
        path: path.to_path_buf(),
        metadata,
        model_bytes
    })
}

/// Writes a model file with the given metadata and payload to the given
/// path.
///
/// # Arguments
///
/// * `path` -
/// * `metadata` -
/// * `model_bytes` -
///
pub fn write_model(path: &Path, metadata: &Metadata, model_bytes: &[u8]) -> Result<(), Error> {
    let metadata_bytes = serde_json::to_vec(metadata)?;
    let file_size = 32 + metadata_bytes.len() as u64 + model_bytes.len() as u64;
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&file_size.to_le_bytes())?;
    writer.write_all(&(metadata_bytes.len() as u64).to_le_bytes())?;
    writer.write_all(&metadata_bytes)?;
    writer.write_all(model_bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn metadata(engine: &str) -> Metadata {
        Metadata {
            engine: engine.to_string(),
            input_features: "agz".to_string(),
            input_layout: "nhwc".to_string(),
            board_size: tk_go::SIZE,
            input_type: None,
            num_replicas: None
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tk_loader_{}_{}", std::process::id(), name))
    }

    #[test]
    fn round_trip() {
        let path = temp_path("round_trip.pb");

        write_model(&path, &metadata("fake"), b"payload").unwrap();

        let definition = read_model(&path).unwrap();

        assert_eq!(definition.metadata.engine, "fake");
        assert_eq!(definition.metadata.input_features, "agz");
        assert_eq!(definition.model_bytes, b"payload");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn bad_magic_is_rejected() {
        let path = temp_path("bad_magic.pb");

        fs::write(&path, b"<wrong!>........").unwrap();
        assert!(read_model(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_file_is_rejected() {
        let path = temp_path("truncated.pb");

        write_model(&path, &metadata("fake"), b"payload").unwrap();

        let bytes = fs::read(&path).unwrap();

        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(read_model(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn wrong_board_size_is_rejected() {
        let path = temp_path("board_size.pb");
        let mut metadata = metadata("fake");

        metadata.board_size = tk_go::SIZE + 2;
        write_model(&path, &metadata, b"").unwrap();
        assert!(read_model(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let path = temp_path("missing_key.pb");
        let metadata_bytes = br#"{"engine": "fake"}"#;
        let file_size = 32 + metadata_bytes.len() as u64;
        let mut bytes = vec! [];

        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&file_size.to_le_bytes());
        bytes.extend_from_slice(&(metadata_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(metadata_bytes);
        fs::write(&path, &bytes).unwrap();

        assert!(read_model(&path).is_err());
        fs::remove_file(&path).ok();
    }
}
