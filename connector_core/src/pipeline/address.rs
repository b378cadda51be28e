//! Endpoint addresses.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Address type handled by the file endpoints.
pub const FILE_TYPE: &str = "File";

/// Property holding the directory of a `File` address.
pub const PATH_PROPERTY: &str = "path";

/// Property holding the file name of a `File` address.
pub const FILENAME_PROPERTY: &str = "filename";

/// Identifies a source or sink endpoint.
///
/// The `type` discriminator selects the factory; the remaining properties
/// are interpreted by that factory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAddress")]
pub struct DataAddress {
    #[serde(rename = "type")]
    address_type: String,
    properties: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawAddress {
    #[serde(rename = "type")]
    address_type: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl TryFrom<RawAddress> for DataAddress {
    type Error = TransferError;

    fn try_from(raw: RawAddress) -> Result<Self, Self::Error> {
        DataAddress::new(raw.address_type, raw.properties)
    }
}

impl DataAddress {
    /// Build a validated address.
    pub fn new(
        address_type: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Result<Self, TransferError> {
        let address = Self {
            address_type: address_type.into(),
            properties,
        };
        address.validate()?;
        Ok(address)
    }

    /// A `File` address for `path/filename`.
    pub fn file(path: impl Into<String>, filename: impl Into<String>) -> Result<Self, TransferError> {
        let mut properties = BTreeMap::new();
        properties.insert(PATH_PROPERTY.to_string(), path.into());
        properties.insert(FILENAME_PROPERTY.to_string(), filename.into());
        Self::new(FILE_TYPE, properties)
    }

    /// Split a filesystem path into a `File` address.
    pub fn from_file_path(path: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| {
                TransferError::InvalidAddress(format!("'{}' has no file name", path.display()))
            })?
            .to_string();
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        Self::file(dir, filename)
    }

    fn validate(&self) -> Result<(), TransferError> {
        if self.address_type.trim().is_empty() {
            return Err(TransferError::InvalidAddress(
                "address type must not be empty".to_string(),
            ));
        }
        if self.address_type == FILE_TYPE {
            for required in [PATH_PROPERTY, FILENAME_PROPERTY] {
                match self.properties.get(required) {
                    Some(value) if !value.is_empty() => {}
                    _ => {
                        return Err(TransferError::InvalidAddress(format!(
                            "File address requires a non-empty '{}' property",
                            required
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn address_type(&self) -> &str {
        &self.address_type
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Like [`Self::property`], but a missing key is an error.
    pub fn required(&self, key: &str) -> Result<&str, TransferError> {
        self.property(key).ok_or_else(|| {
            TransferError::InvalidAddress(format!(
                "{} address is missing property '{}'",
                self.address_type, key
            ))
        })
    }
}

impl fmt::Display for DataAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address_type)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", props.join(", "))?;
        }
        Ok(())
    }
}
