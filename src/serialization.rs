//! Serialization support for checkpointing.
//!
//! Both engines can be saved and restored mid-training; a restored engine
//! produces the same `compute()` output as the original (the RNG serializes
//! its seed and stream position and resumes on load). The exact byte layout
//! is not a stability guarantee; only save/restore equivalence is.
//!
//! # Supported Formats
//!
//! - **Binary** - compact bincode encoding (default)
//! - **JSON** - human-readable, for debugging and interoperability
//!
//! # Example
//!
//! ```rust,ignore
//! use veles::prelude::*;
//!
//! let sp = SpatialPooler::new(SpatialPoolerParams::default())?;
//! sp.save_to_file("model.bin", SerializableFormat::Binary)?;
//! let restored = SpatialPooler::load_from_file("model.bin", SerializableFormat::Binary)?;
//! ```

use crate::error::{Result, VelesError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

/// Serialization format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializableFormat {
    /// Compact binary serialization (default).
    #[default]
    Binary,

    /// Human-readable JSON format.
    Json,
}

impl std::fmt::Display for SerializableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializableFormat::Binary => write!(f, "BINARY"),
            SerializableFormat::Json => write!(f, "JSON"),
        }
    }
}

impl std::str::FromStr for SerializableFormat {
    type Err = VelesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BINARY" | "BIN" => Ok(SerializableFormat::Binary),
            "JSON" => Ok(SerializableFormat::Json),
            _ => Err(VelesError::InvalidParameter {
                name: "format",
                message: format!("Unknown format '{}'. Expected: BINARY, JSON", s),
            }),
        }
    }
}

/// Trait for types that can be serialized and deserialized.
///
/// Blanket-implemented for everything that is `Serialize + DeserializeOwned`,
/// which covers both engines, the SDR type and the RNG.
pub trait Serializable: Serialize + DeserializeOwned + Sized {
    /// Serializes to a byte vector.
    fn to_bytes(&self, format: SerializableFormat) -> Result<Vec<u8>> {
        match format {
            SerializableFormat::Binary => {
                bincode::serialize(self).map_err(|e| VelesError::SerializationError {
                    message: format!("Binary serialization failed: {}", e),
                })
            }
            SerializableFormat::Json => {
                serde_json::to_vec_pretty(self).map_err(|e| VelesError::SerializationError {
                    message: format!("JSON serialization failed: {}", e),
                })
            }
        }
    }

    /// Deserializes from a byte slice.
    fn from_bytes(bytes: &[u8], format: SerializableFormat) -> Result<Self> {
        match format {
            SerializableFormat::Binary => {
                bincode::deserialize(bytes).map_err(|e| VelesError::SerializationError {
                    message: format!("Binary deserialization failed: {}", e),
                })
            }
            SerializableFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| VelesError::SerializationError {
                    message: format!("JSON deserialization failed: {}", e),
                })
            }
        }
    }

    /// Serializes to a JSON string.
    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| VelesError::SerializationError {
            message: format!("JSON serialization failed: {}", e),
        })
    }

    /// Deserializes from a JSON string.
    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VelesError::SerializationError {
            message: format!("JSON deserialization failed: {}", e),
        })
    }

    /// Serializes to a writer.
    fn save<W: Write>(&self, writer: W, format: SerializableFormat) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        match format {
            SerializableFormat::Binary => bincode::serialize_into(&mut writer, self).map_err(|e| {
                VelesError::SerializationError {
                    message: format!("Binary serialization failed: {}", e),
                }
            }),
            SerializableFormat::Json => serde_json::to_writer_pretty(&mut writer, self).map_err(
                |e| VelesError::SerializationError {
                    message: format!("JSON serialization failed: {}", e),
                },
            ),
        }
    }

    /// Deserializes from a reader.
    fn load<R: Read>(reader: R, format: SerializableFormat) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        match format {
            SerializableFormat::Binary => bincode::deserialize_from(&mut reader).map_err(|e| {
                VelesError::SerializationError {
                    message: format!("Binary deserialization failed: {}", e),
                }
            }),
            SerializableFormat::Json => {
                serde_json::from_reader(&mut reader).map_err(|e| VelesError::SerializationError {
                    message: format!("JSON deserialization failed: {}", e),
                })
            }
        }
    }

    /// Saves to a file.
    fn save_to_file<P: AsRef<Path>>(&self, path: P, format: SerializableFormat) -> Result<()> {
        let file = File::create(path.as_ref()).map_err(|e| VelesError::IoError {
            message: format!("Failed to create file: {}", e),
        })?;
        self.save(file, format)
    }

    /// Loads from a file.
    fn load_from_file<P: AsRef<Path>>(path: P, format: SerializableFormat) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| VelesError::IoError {
            message: format!("Failed to open file: {}", e),
        })?;
        Self::load(file, format)
    }
}

impl<T> Serializable for T where T: Serialize + DeserializeOwned + Sized {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sdr;

    #[test]
    fn test_format_parsing() {
        assert_eq!(
            "BINARY".parse::<SerializableFormat>().unwrap(),
            SerializableFormat::Binary
        );
        assert_eq!(
            "json".parse::<SerializableFormat>().unwrap(),
            SerializableFormat::Json
        );
        assert!("unknown".parse::<SerializableFormat>().is_err());
    }

    #[test]
    fn test_sdr_binary_round_trip() {
        let mut sdr = Sdr::new(&[100]);
        sdr.set_sparse(&[1, 5, 10, 50, 99]).unwrap();

        let bytes = sdr.to_bytes(SerializableFormat::Binary).unwrap();
        let restored = Sdr::from_bytes(&bytes, SerializableFormat::Binary).unwrap();
        assert_eq!(restored, sdr);
    }

    #[test]
    fn test_sdr_json_round_trip() {
        let mut sdr = Sdr::new(&[100]);
        sdr.set_sparse(&[1, 5, 10]).unwrap();

        let json = sdr.to_json().unwrap();
        assert!(json.contains("dimensions"));
        let restored = Sdr::from_json(&json).unwrap();
        assert_eq!(restored, sdr);
    }
}
