//! Entity mapping
//!
//! Domain types opt into persistence by implementing [`Entity`]. The session
//! factory only works with entity types registered in its [`EntityRegistry`],
//! and binding checks every registered mapping against the schema.

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::Row;

/// A type persisted as one row of one table
///
/// The table must have an integer identifier column generated by the engine.
/// `values()` returns the mapped columns in the order of `COLUMNS`, and
/// `from_row()` reads a row selected as `ID_COLUMN, COLUMNS...`.
pub trait Entity: Sized {
    const TABLE: &'static str;

    const ID_COLUMN: &'static str = "id";

    /// Mapped columns, excluding the identifier
    const COLUMNS: &'static [&'static str];

    /// Column holding the business key, if the entity has one
    const REF_ID_COLUMN: Option<&'static str> = Some("ref_id");

    /// Identifier, or 0 if the entity has not been inserted yet
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn values(&self) -> Vec<Value>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Table layout an entity type expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
    pub ref_id_column: Option<&'static str>,
}

impl EntityMapping {
    pub fn of<E: Entity>() -> Self {
        EntityMapping {
            table: E::TABLE,
            id_column: E::ID_COLUMN,
            columns: E::COLUMNS,
            ref_id_column: E::REF_ID_COLUMN,
        }
    }

    /// Every column the mapping touches, identifier first
    pub fn all_columns(&self) -> Vec<&'static str> {
        let mut columns = vec![self.id_column];
        columns.extend(self.columns.iter().copied());
        if let Some(ref_id) = self.ref_id_column {
            if !columns.contains(&ref_id) {
                columns.push(ref_id);
            }
        }
        columns
    }
}

/// The set of entity types a session factory can persist
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    mappings: BTreeMap<&'static str, EntityMapping>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.mappings.insert(E::TABLE, EntityMapping::of::<E>());
        self
    }

    /// Builder-style [`EntityRegistry::register`]
    pub fn with<E: Entity>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn contains(&self, table: &str) -> bool {
        self.mappings.contains_key(table)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &EntityMapping> {
        self.mappings.values()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
