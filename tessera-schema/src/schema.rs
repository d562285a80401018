use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use itertools::{Either, Itertools};
use serde::{Deserialize, Serialize};
use tessera_dtype::PType;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

use crate::{Attribute, Domain, TESSERA_COORDS};

/// Version of the persisted schema document.
pub const SCHEMA_FORMAT_VERSION: u16 = 1;

/// The default number of cells per data tile of a sparse fragment.
pub const DEFAULT_CAPACITY: u64 = 10_000;

/// How cells of an array are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayType {
    /// Every cell of the domain exists; unwritten cells hold the attribute's fill value.
    Dense,
    /// Only explicitly written coordinates exist.
    Sparse,
}

impl Display for ArrayType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ArrayType::Dense => write!(f, "dense"),
            ArrayType::Sparse => write!(f, "sparse"),
        }
    }
}

/// The iteration order of tiles within the domain or cells within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// The last dimension varies fastest.
    #[default]
    RowMajor,
    /// The first dimension varies fastest.
    ColMajor,
}

impl Order {
    /// Dimension indices from the most significant to the least significant.
    pub fn dim_order(self, ndim: usize) -> impl Iterator<Item = usize> + Clone {
        match self {
            Order::RowMajor => Either::Left(0..ndim),
            Order::ColMajor => Either::Right((0..ndim).rev()),
        }
    }

    /// Compare two per-dimension tile coordinate vectors in this order.
    pub fn compare_tiles(self, a: &[u64], b: &[u64]) -> Ordering {
        self.dim_order(a.len())
            .map(|d| a[d].cmp(&b[d]))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// A field a query can bind a buffer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// The attribute at the given position of the schema.
    Attribute(usize),
    /// The coordinates of a single dimension, by position in the domain.
    Dimension(usize),
    /// The interleaved coordinate tuples, under [`TESSERA_COORDS`].
    Coords,
}

/// The complete, validated description of an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    array_type: ArrayType,
    domain: Domain,
    attributes: Vec<Attribute>,
    cell_order: Order,
    tile_order: Order,
    capacity: u64,
}

#[derive(Serialize, Deserialize)]
struct SchemaFile {
    version: u16,
    schema: ArraySchema,
}

impl ArraySchema {
    /// Start building a schema for an array of the given type.
    pub fn builder(array_type: ArrayType) -> SchemaBuilder {
        SchemaBuilder::new(array_type)
    }

    /// Check every structural rule of the schema.
    pub fn validate(&self) -> TesseraResult<()> {
        self.domain.validate()?;
        if self.attributes.is_empty() {
            tessera_bail!(Schema: "a schema needs at least one attribute");
        }
        for attr in &self.attributes {
            attr.validate()?;
            if self.domain.dimension(attr.name()).is_some() {
                tessera_bail!(Schema: "attribute {} collides with a dimension name", attr.name());
            }
        }
        if let Some(dup) = self.attributes.iter().map(Attribute::name).duplicates().next() {
            tessera_bail!(Schema: "duplicate attribute name {}", dup);
        }
        if self.array_type == ArrayType::Dense && !self.domain.ptype().is_int() {
            tessera_bail!(
                Schema: "dense arrays need integer dimensions, got {}",
                self.domain.ptype()
            );
        }
        if self.capacity == 0 {
            tessera_bail!(Schema: "tile capacity must be positive");
        }
        Ok(())
    }

    /// Whether the array is dense or sparse.
    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// The coordinate space of the array.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The attributes, in declaration order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    /// The order of cells inside a tile.
    pub fn cell_order(&self) -> Order {
        self.cell_order
    }

    /// The order of tiles inside the domain.
    pub fn tile_order(&self) -> Order {
        self.tile_order
    }

    /// The maximum number of cells of a sparse data tile.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Resolve a field name to an attribute, a dimension or the coordinates.
    pub fn field(&self, name: &str) -> TesseraResult<Field> {
        if name == TESSERA_COORDS {
            return Ok(Field::Coords);
        }
        if let Some(idx) = self.attributes.iter().position(|a| a.name() == name) {
            return Ok(Field::Attribute(idx));
        }
        self.domain
            .dimension_index(name)
            .map(Field::Dimension)
            .ok_or_else(|| tessera_err!(NotFound: "no field named {} in the schema", name))
    }

    /// The name of a resolved field.
    pub fn field_name(&self, field: Field) -> &str {
        match field {
            Field::Attribute(idx) => self.attributes[idx].name(),
            Field::Dimension(idx) => self.domain.dimensions()[idx].name(),
            Field::Coords => TESSERA_COORDS,
        }
    }

    /// The scalar type of the values of a field.
    pub fn field_ptype(&self, field: Field) -> PType {
        match field {
            Field::Attribute(idx) => self.attributes[idx].ptype(),
            Field::Dimension(_) | Field::Coords => self.domain.ptype(),
        }
    }

    /// The number of bytes a single cell occupies in a buffer bound to `field`.
    pub fn cell_size(&self, field: Field) -> usize {
        match field {
            Field::Coords => self.domain.tuple_width(),
            _ => self.field_ptype(field).byte_width(),
        }
    }

    /// Serialize the schema into its persisted JSON document.
    pub fn to_json(&self) -> TesseraResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&SchemaFile {
            version: SCHEMA_FORMAT_VERSION,
            schema: self.clone(),
        })?)
    }

    /// Parse and validate a persisted JSON document.
    pub fn from_json(bytes: &[u8]) -> TesseraResult<Self> {
        let file: SchemaFile = serde_json::from_slice(bytes)?;
        if file.version != SCHEMA_FORMAT_VERSION {
            tessera_bail!(
                Corrupted: "unsupported schema version {}, expected {}",
                file.version,
                SCHEMA_FORMAT_VERSION
            );
        }
        file.schema
            .validate()
            .map_err(|e| e.with_context("persisted schema is invalid"))?;
        Ok(file.schema)
    }
}

impl Display for ArraySchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.array_type,
            self.domain,
            self.attributes.iter().format(", ")
        )
    }
}

/// Incremental constructor for an [`ArraySchema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    array_type: ArrayType,
    domain: Option<Domain>,
    attributes: Vec<Attribute>,
    cell_order: Order,
    tile_order: Order,
    capacity: u64,
}

impl SchemaBuilder {
    /// A builder with row-major orders and the default capacity.
    pub fn new(array_type: ArrayType) -> Self {
        Self {
            array_type,
            domain: None,
            attributes: Vec::new(),
            cell_order: Order::RowMajor,
            tile_order: Order::RowMajor,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Attach the domain. A schema has exactly one.
    pub fn with_domain(mut self, domain: Domain) -> TesseraResult<Self> {
        if self.domain.is_some() {
            tessera_bail!(Schema: "the schema already has a domain");
        }
        if let Some(attr) = self.attributes.iter().find(|a| domain.dimension(a.name()).is_some()) {
            tessera_bail!(Schema: "attribute {} collides with a dimension name", attr.name());
        }
        self.domain = Some(domain);
        Ok(self)
    }

    /// Append an attribute.
    ///
    /// Fails if the name is reserved or already used by an attribute or a dimension.
    pub fn add_attribute(mut self, attribute: Attribute) -> TesseraResult<Self> {
        attribute.validate()?;
        if self.attributes.iter().any(|a| a.name() == attribute.name()) {
            tessera_bail!(Schema: "duplicate attribute name {}", attribute.name());
        }
        if self
            .domain
            .as_ref()
            .is_some_and(|d| d.dimension(attribute.name()).is_some())
        {
            tessera_bail!(Schema: "attribute {} collides with a dimension name", attribute.name());
        }
        self.attributes.push(attribute);
        Ok(self)
    }

    /// Set the order of cells inside a tile.
    pub fn with_cell_order(mut self, order: Order) -> Self {
        self.cell_order = order;
        self
    }

    /// Set the order of tiles inside the domain.
    pub fn with_tile_order(mut self, order: Order) -> Self {
        self.tile_order = order;
        self
    }

    /// Set the maximum number of cells of a sparse data tile.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Validate and freeze the schema.
    pub fn build(self) -> TesseraResult<ArraySchema> {
        let Some(domain) = self.domain else {
            tessera_bail!(Schema: "the schema has no domain");
        };
        let schema = ArraySchema {
            array_type: self.array_type,
            domain,
            attributes: self.attributes,
            cell_order: self.cell_order,
            tile_order: self.tile_order,
            capacity: self.capacity,
        };
        schema.validate()?;
        Ok(schema)
    }
}
