//! Entity types used by tests

use rusqlite::types::Value;
use rusqlite::Row;

use super::Entity;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Flow {
    pub id: i64,
    pub ref_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub flow_type: Option<String>,
    pub formula: Option<String>,
    pub version: i64,
}

impl Flow {
    pub fn new(ref_id: &str, name: &str) -> Self {
        Flow {
            ref_id: Some(ref_id.to_string()),
            name: name.to_string(),
            ..Default::default()
        }
    }
}

fn text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

impl Entity for Flow {
    const TABLE: &'static str = "tbl_flows";
    const COLUMNS: &'static [&'static str] =
        &["ref_id", "name", "description", "flow_type", "formula", "version"];

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.ref_id),
            Value::Text(self.name.clone()),
            text(&self.description),
            text(&self.flow_type),
            text(&self.formula),
            Value::Integer(self.version),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Flow {
            id: row.get(0)?,
            ref_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            flow_type: row.get(4)?,
            formula: row.get(5)?,
            version: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Actor {
    pub id: i64,
    pub ref_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
}

impl Entity for Actor {
    const TABLE: &'static str = "tbl_actors";
    const COLUMNS: &'static [&'static str] = &["ref_id", "name", "email"];

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.ref_id),
            Value::Text(self.name.clone()),
            text(&self.email),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Actor {
            id: row.get(0)?,
            ref_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
        })
    }
}

/// Maps onto a table the bundled schema does not have
#[derive(Debug, Default)]
pub struct Widget {
    pub id: i64,
    pub name: String,
}

impl Entity for Widget {
    const TABLE: &'static str = "tbl_widgets";
    const COLUMNS: &'static [&'static str] = &["name"];
    const REF_ID_COLUMN: Option<&'static str> = None;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::Text(self.name.clone())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Widget {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }
}

/// Maps onto an existing table but names a column it does not have
#[derive(Debug, Default)]
pub struct MisnamedActor {
    pub id: i64,
    pub nickname: String,
}

impl Entity for MisnamedActor {
    const TABLE: &'static str = "tbl_actors";
    const COLUMNS: &'static [&'static str] = &["nickname"];
    const REF_ID_COLUMN: Option<&'static str> = None;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::Text(self.nickname.clone())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MisnamedActor {
            id: row.get(0)?,
            nickname: row.get(1)?,
        })
    }
}
