//! Shared fixtures for the integration tests: a recording in-memory driver
//! and the fish/types catalog most scenarios run against.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use loam::prelude::*;

/// A [`Connection`] that records every statement and feeds back scripted
/// result rows, FIFO. Cloning shares the underlying state, so a test can
/// keep a handle after moving a clone into the session.
#[derive(Clone, Default)]
pub struct RecordingConnection {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    replies: Mutex<VecDeque<Vec<Row>>>,
    fail_contains: Mutex<Option<String>>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result rows for the next row-producing statement.
    pub fn push_reply(&self, rows: Vec<Row>) {
        self.inner.replies.lock().unwrap().push_back(rows);
    }

    /// Fail any statement whose SQL contains `needle`.
    pub fn fail_when(&self, needle: &str) {
        *self.inner.fail_contains.lock().unwrap() = Some(needle.to_string());
    }

    /// Every recorded statement, SQL text only.
    pub fn statements(&self) -> Vec<String> {
        self.inner
            .statements
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Every recorded statement with its parameters.
    pub fn recorded(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.statements.lock().unwrap().clone()
    }

    fn check_failure(&self, sql: &str) -> Option<Error> {
        let guard = self.inner.fail_contains.lock().unwrap();
        guard
            .as_deref()
            .filter(|needle| sql.contains(needle))
            .map(|_| Error::storage(format!("scripted failure for: {sql}")))
    }
}

impl Connection for RecordingConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            if let Some(e) = self.check_failure(&sql) {
                return Outcome::Err(e);
            }
            self.inner.statements.lock().unwrap().push((sql, params));
            let rows = self
                .inner
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Outcome::Ok(rows)
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = Outcome<u64, Error>> + Send {
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            if let Some(e) = self.check_failure(&sql) {
                return Outcome::Err(e);
            }
            self.inner.statements.lock().unwrap().push((sql, params));
            Outcome::Ok(1)
        }
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

/// Two collections with a nullable foreign key: `fish.type_id -> types.id`.
/// The catalog derives the paired views `fish.type` and `types.fish`.
pub fn catalog() -> Catalog {
    let types = SchemaBuilder::new("types")
        .attribute(
            "id",
            AttributeType::new(AttributeKind::Uuid).primary_key(true),
        )
        .attribute("name", AttributeType::new(AttributeKind::text()))
        .build()
        .unwrap();
    let fish = SchemaBuilder::new("fish")
        .attribute(
            "id",
            AttributeType::new(AttributeKind::Uuid).primary_key(true),
        )
        .attribute("name", AttributeType::new(AttributeKind::text()))
        .attribute(
            "type_id",
            AttributeType::new(AttributeKind::Uuid)
                .nullable(true)
                .references(AttributeIdentity::new("types", "id")),
        )
        .build()
        .unwrap();
    Catalog::builder()
        .schema(types)
        .schema(fish)
        .build()
        .unwrap()
}

pub const TYPE_ID: &str = "11111111-1111-4111-8111-111111111111";
pub const FISH_ID: &str = "22222222-2222-4222-8222-222222222222";
pub const FISH_ID_B: &str = "33333333-3333-4333-8333-333333333333";

pub fn type_row(name: &str) -> Row {
    Row::from_pairs(vec![
        ("id", Value::from(TYPE_ID)),
        ("name", Value::from(name)),
    ])
}

pub fn fish_row(id: &str, name: &str, type_id: Option<&str>) -> Row {
    Row::from_pairs(vec![
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        (
            "type_id",
            type_id.map_or(Value::Null, Value::from),
        ),
    ])
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}
