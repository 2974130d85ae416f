// SQLite execution behind the SQL-over-TCP protocol.
//
// Statements arrive as opaque SQL with positional JSON params; rows go back
// as JSON tuples ordered like the SELECT list, which also covers RETURNING
// clauses.

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS User (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    passwordHash TEXT NOT NULL,
    status TEXT CHECK(status IN ('online','offline')) NOT NULL DEFAULT 'offline',
    role CHAR(10) CHECK(role IN ('player','developer')) NOT NULL DEFAULT 'player'
);

CREATE TABLE IF NOT EXISTS Game (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(100) NOT NULL,
    description TEXT,
    OwnerId INTEGER NOT NULL,
    LatestVersion CHAR(10) NOT NULL,
    min_players INTEGER NOT NULL DEFAULT 2,
    max_players INTEGER NOT NULL DEFAULT 2,
    FOREIGN KEY(OwnerId) REFERENCES User(id)
);

CREATE TABLE IF NOT EXISTS Room (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    hostUserId INTEGER NOT NULL,
    visibility TEXT CHECK(visibility IN ('public','private')) NOT NULL,
    status TEXT CHECK(status IN ('idle','playing')) NOT NULL,
    gameId INTEGER NOT NULL,
    FOREIGN KEY(gameId) REFERENCES Game(id),
    FOREIGN KEY(hostUserId) REFERENCES User(id)
);

CREATE TABLE IF NOT EXISTS in_room (
    roomId INTEGER NOT NULL,
    userId INTEGER NOT NULL,
    PRIMARY KEY(roomId, userId),
    FOREIGN KEY(roomId) REFERENCES Room(id),
    FOREIGN KEY(userId) REFERENCES User(id)
);

CREATE TABLE IF NOT EXISTS invite_list (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    roomId INTEGER NOT NULL,
    fromId INTEGER NOT NULL,
    toId INTEGER NOT NULL,
    FOREIGN KEY(roomId) REFERENCES Room(id),
    FOREIGN KEY(fromId) REFERENCES User(id),
    FOREIGN KEY(toId) REFERENCES User(id)
);

CREATE TABLE IF NOT EXISTS request_join_list (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    roomId INTEGER NOT NULL,
    fromId INTEGER NOT NULL,
    toId INTEGER NOT NULL,
    FOREIGN KEY(roomId) REFERENCES Room(id),
    FOREIGN KEY(fromId) REFERENCES User(id),
    FOREIGN KEY(toId) REFERENCES User(id)
);

CREATE TABLE IF NOT EXISTS GameVersion (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gameId INTEGER NOT NULL,
    VersionNumber CHAR(10) NOT NULL,
    Command TEXT NOT NULL,
    UploadDate TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(gameId) REFERENCES Game(id)
);

CREATE TABLE IF NOT EXISTS played (
    gameId INTEGER NOT NULL,
    userId INTEGER NOT NULL,
    PRIMARY KEY(gameId, userId),
    FOREIGN KEY(gameId) REFERENCES Game(id),
    FOREIGN KEY(userId) REFERENCES User(id)
);

CREATE TABLE IF NOT EXISTS comment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gameId INTEGER NOT NULL,
    userId INTEGER NOT NULL,
    content TEXT NOT NULL,
    timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    score INTEGER CHECK(score BETWEEN 1 AND 5) NOT NULL,
    FOREIGN KEY(gameId) REFERENCES Game(id),
    FOREIGN KEY(userId) REFERENCES User(id)
);
"#;

#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Opens (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests; a single pooled connection keeps every
    /// statement on the same database.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Executes one statement and returns all produced rows as JSON tuples.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, sqlx::Error> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or_default())
                    }
                }
                Value::String(s) => query.bind(s.clone()),
                // Nested structures are stored as their JSON text.
                other => query.bind(other.to_string()),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_tuple).collect())
    }
}

fn row_to_tuple(row: &SqliteRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|idx| column_value(row, idx))
        .collect()
}

fn column_value(row: &SqliteRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    match raw.type_info().name() {
        "INTEGER" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "BLOB" => Value::Null,
        // TEXT plus SQLite's loosely typed timestamp columns.
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqlStore {
        let store = SqlStore::open_in_memory().await.expect("open store");
        store.init_schema().await.expect("init schema");
        store
    }

    #[tokio::test]
    async fn insert_returning_yields_the_new_id() {
        let store = store().await;

        let rows = store
            .execute(
                "INSERT INTO User (name, passwordHash, role) VALUES (?, ?, ?) RETURNING id",
                &[json!("alice"), json!("H"), json!("player")],
            )
            .await
            .expect("insert should succeed");

        assert_eq!(rows, vec![vec![json!(1)]]);
    }

    #[tokio::test]
    async fn select_returns_tuples_in_select_list_order() {
        let store = store().await;
        store
            .execute(
                "INSERT INTO User (name, passwordHash, role) VALUES (?, ?, ?)",
                &[json!("bob"), json!("H2"), json!("developer")],
            )
            .await
            .expect("insert should succeed");

        let rows = store
            .execute(
                "SELECT name, role, status FROM User WHERE name = ?",
                &[json!("bob")],
            )
            .await
            .expect("select should succeed");

        assert_eq!(rows, vec![vec![json!("bob"), json!("developer"), json!("offline")]]);
    }

    #[tokio::test]
    async fn check_constraint_violation_surfaces_as_error() {
        let store = store().await;
        store
            .execute(
                "INSERT INTO User (name, passwordHash, role) VALUES (?, ?, ?)",
                &[json!("carol"), json!("H3"), json!("player")],
            )
            .await
            .expect("insert should succeed");

        let result = store
            .execute(
                "INSERT INTO comment (gameId, userId, content, score) VALUES (?, ?, ?, ?)",
                &[json!(1), json!(1), json!("x"), json!(6)],
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn avg_aggregate_comes_back_as_real() {
        let store = store().await;
        store
            .execute(
                "INSERT INTO User (name, passwordHash, role) VALUES (?, ?, ?)",
                &[json!("dave"), json!("H4"), json!("player")],
            )
            .await
            .expect("insert should succeed");
        for score in [3, 4] {
            store
                .execute(
                    "INSERT INTO comment (gameId, userId, content, score) VALUES (?, ?, ?, ?)",
                    &[json!(1), json!(1), json!("x"), json!(score)],
                )
                .await
                .expect("insert should succeed");
        }

        let rows = store
            .execute("SELECT AVG(score) FROM comment WHERE gameId = ?", &[json!(1)])
            .await
            .expect("select should succeed");

        assert_eq!(rows, vec![vec![json!(3.5)]]);
    }

    #[tokio::test]
    async fn null_columns_decode_as_json_null() {
        let store = store().await;
        store
            .execute(
                "INSERT INTO User (name, passwordHash) VALUES (?, ?)",
                &[json!("erin"), json!("H5")],
            )
            .await
            .expect("insert should succeed");
        store
            .execute(
                "INSERT INTO Game (name, description, OwnerId, LatestVersion) VALUES (?, ?, ?, ?)",
                &[json!("mine"), Value::Null, json!(1), json!("0.0.1")],
            )
            .await
            .expect("insert should succeed");

        let rows = store
            .execute("SELECT description FROM Game WHERE name = ?", &[json!("mine")])
            .await
            .expect("select should succeed");

        assert_eq!(rows, vec![vec![Value::Null]]);
    }
}
