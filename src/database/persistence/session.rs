//! Entity sessions
//!
//! A session owns one pooled connection, and with it one open transaction.
//! Nothing a session writes is visible elsewhere until [`Session::commit`];
//! dropping an uncommitted session rolls its changes back.

use rusqlite::{params_from_iter, OptionalExtension};
use tracing::trace;

use super::{Dialect, Entity, SessionFactory};
use crate::database::core::{quote_identifier, Connection};
use crate::error::SessionError;

pub struct Session<'f> {
    factory: &'f SessionFactory,
    conn: Connection,
}

impl<'f> Session<'f> {
    pub(super) fn new(factory: &'f SessionFactory, conn: Connection) -> Self {
        Session { factory, conn }
    }

    fn check<E: Entity>(&self) -> Result<(), SessionError> {
        if !self.factory.is_open() {
            return Err(SessionError::Closed);
        }
        if !self.factory.registry().contains(E::TABLE) {
            return Err(SessionError::Unmapped(E::TABLE));
        }
        Ok(())
    }

    fn select_list<E: Entity>() -> String {
        std::iter::once(E::ID_COLUMN)
            .chain(E::COLUMNS.iter().copied())
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Insert a new entity and assign its generated identifier
    pub fn insert<E: Entity>(&self, entity: &mut E) -> Result<i64, SessionError> {
        self.check::<E>()?;
        let values = entity.values();
        debug_assert_eq!(values.len(), E::COLUMNS.len());

        let columns = E::COLUMNS
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=values.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(E::TABLE),
            columns,
            placeholders
        );
        trace!("{}", sql);

        let id = match self.factory.dialect() {
            Dialect::Sqlite => {
                let sql = format!("{} RETURNING {}", sql, quote_identifier(E::ID_COLUMN));
                self.conn
                    .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?
            }
            Dialect::SqliteLegacy => {
                self.conn.execute(&sql, params_from_iter(values.iter()))?;
                self.conn.last_insert_rowid()
            }
        };

        entity.set_id(id);
        Ok(id)
    }

    /// Write all mapped columns of an inserted entity
    pub fn update<E: Entity>(&self, entity: &E) -> Result<(), SessionError> {
        self.check::<E>()?;
        if entity.id() <= 0 {
            return Err(SessionError::Transient(E::TABLE));
        }
        let values = entity.values();
        let assignments = E::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_identifier(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_identifier(E::TABLE),
            assignments,
            quote_identifier(E::ID_COLUMN),
            values.len() + 1
        );
        trace!("{}", sql);

        let params = values
            .into_iter()
            .chain(std::iter::once(rusqlite::types::Value::Integer(entity.id())));
        self.conn.execute(&sql, params_from_iter(params))?;
        Ok(())
    }

    /// Load an entity by identifier
    pub fn find<E: Entity>(&self, id: i64) -> Result<Option<E>, SessionError> {
        self.check::<E>()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            Self::select_list::<E>(),
            quote_identifier(E::TABLE),
            quote_identifier(E::ID_COLUMN)
        );
        let entity = self
            .conn
            .query_row(&sql, [id], |row| E::from_row(row))
            .optional()?;
        Ok(entity)
    }

    /// Load an entity by business key
    ///
    /// Returns the first match if the key is not unique in the table.
    pub fn find_by_ref_id<E: Entity>(&self, ref_id: &str) -> Result<Option<E>, SessionError> {
        self.check::<E>()?;
        let ref_column = E::REF_ID_COLUMN.ok_or(SessionError::NoBusinessKey(E::TABLE))?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {} LIMIT 1",
            Self::select_list::<E>(),
            quote_identifier(E::TABLE),
            quote_identifier(ref_column),
            quote_identifier(E::ID_COLUMN)
        );
        let entity = self
            .conn
            .query_row(&sql, [ref_id], |row| E::from_row(row))
            .optional()?;
        Ok(entity)
    }

    /// Load every entity of a type, ordered by identifier
    pub fn all<E: Entity>(&self) -> Result<Vec<E>, SessionError> {
        self.check::<E>()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            Self::select_list::<E>(),
            quote_identifier(E::TABLE),
            quote_identifier(E::ID_COLUMN)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map([], |row| E::from_row(row))?
            .collect::<rusqlite::Result<Vec<E>>>()?;
        Ok(entities)
    }

    pub fn count<E: Entity>(&self) -> Result<u64, SessionError> {
        self.check::<E>()?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(E::TABLE));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Delete an entity; returns whether a row was removed
    pub fn delete<E: Entity>(&self, entity: &E) -> Result<bool, SessionError> {
        self.check::<E>()?;
        if entity.id() <= 0 {
            return Err(SessionError::Transient(E::TABLE));
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_identifier(E::TABLE),
            quote_identifier(E::ID_COLUMN)
        );
        let removed = self.conn.execute(&sql, [entity.id()])?;
        Ok(removed > 0)
    }

    /// Make everything written so far visible to other connections
    pub fn commit(&mut self) -> Result<(), SessionError> {
        if !self.factory.is_open() {
            return Err(SessionError::Closed);
        }
        self.conn.commit()?;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), SessionError> {
        self.conn.rollback()?;
        Ok(())
    }

    /// The session's connection, for queries outside the entity mapping
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
