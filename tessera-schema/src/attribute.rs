use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tessera_dtype::{PType, PValue};
use tessera_error::{TesseraResult, tessera_bail};

use crate::TESSERA_COORDS;

/// A named, typed value stored in every cell of an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    ptype: PType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fill_value: Option<PValue>,
}

impl Attribute {
    /// Create an attribute of the given type.
    pub fn new(name: impl Into<String>, ptype: PType) -> Self {
        Self {
            name: name.into(),
            ptype,
            fill_value: None,
        }
    }

    /// Set the value dense reads produce for cells that were never written.
    pub fn with_fill_value(mut self, fill_value: impl Into<PValue>) -> TesseraResult<Self> {
        let fill_value = fill_value.into();
        if !fill_value.is_instance_of(&self.ptype) {
            tessera_bail!(
                Schema: "fill value {} of attribute {} is not of type {}",
                fill_value,
                self.name,
                self.ptype
            );
        }
        self.fill_value = Some(fill_value);
        Ok(self)
    }

    pub(crate) fn validate(&self) -> TesseraResult<()> {
        if self.name.is_empty() {
            tessera_bail!(Schema: "attribute name must not be empty");
        }
        if self.name == TESSERA_COORDS {
            tessera_bail!(Schema: "attribute name {} is reserved for coordinates", TESSERA_COORDS);
        }
        if let Some(fill) = self.fill_value {
            if !fill.is_instance_of(&self.ptype) {
                tessera_bail!(
                    Schema: "fill value {} of attribute {} is not of type {}",
                    fill,
                    self.name,
                    self.ptype
                );
            }
        }
        Ok(())
    }

    /// The name of the attribute.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical type of the attribute's values.
    pub fn ptype(&self) -> PType {
        self.ptype
    }

    /// The fill value for unwritten dense cells, zero unless set explicitly.
    pub fn fill_value(&self) -> PValue {
        self.fill_value.unwrap_or_else(|| PValue::zero(self.ptype))
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.ptype)
    }
}
