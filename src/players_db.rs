use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::ser::SerializeMap;

use crate::schema::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};

const BUSY_TIMEOUT_SECS: u64 = 5;

/// The 21 data columns written by an insert, in statement order.
pub const PLAYER_DATA_COLUMNS: [&str; FEATURE_COUNT + 3] = [
    "name",
    "age",
    "pace",
    "shooting",
    "passing",
    "dribbling",
    "defending",
    "physicality",
    "height",
    "weight",
    "tackles",
    "interceptions",
    "vision",
    "ball_control",
    "reactions",
    "stamina",
    "aggression",
    "balance",
    "composure",
    "overall",
    "photo_url",
];

const INSERT_PLAYER_SQL: &str = r#"
    INSERT INTO players (
        name, age, pace, shooting, passing, dribbling, defending, physicality,
        height, weight, tackles, interceptions, vision, ball_control,
        reactions, stamina, aggression, balance, composure, overall, photo_url
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
        ?9, ?10, ?11, ?12, ?13, ?14,
        ?15, ?16, ?17, ?18, ?19, ?20, ?21
    )
"#;

const SELECT_PLAYER_SQL: &str = r#"
    SELECT
        id, name, age, pace, shooting, passing, dribbling, defending, physicality,
        height, weight, tackles, interceptions, vision, ball_control,
        reactions, stamina, aggression, balance, composure, overall, photo_url, created_at
    FROM players
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct NewPlayer {
    pub name: String,
    pub features: FeatureVector,
    pub overall: f64,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRow {
    pub id: i64,
    pub name: String,
    pub features: FeatureVector,
    pub overall: f64,
    pub photo_url: Option<String>,
    pub created_at: String,
}

/// Column assignments for a partial update. Columns are always drawn from
/// `PLAYER_DATA_COLUMNS`, never from caller-supplied text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerUpdate {
    changes: Vec<(&'static str, Value)>,
}

impl PlayerUpdate {
    pub fn set(&mut self, column: &str, value: Value) -> Result<()> {
        let Some(column) = PLAYER_DATA_COLUMNS.iter().copied().find(|c| *c == column) else {
            bail!("unknown player column `{column}`");
        };
        self.changes.retain(|(c, _)| *c != column);
        self.changes.push((column, value));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

impl Serialize for PlayerRow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT + 5))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("name", &self.name)?;
        for (name, value) in self.features.named() {
            map.serialize_entry(name, &value)?;
        }
        map.serialize_entry("overall", &self.overall)?;
        map.serialize_entry("photo_url", &self.photo_url)?;
        map.serialize_entry("created_at", &self.created_at)?;
        map.end()
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
        .context("set sqlite busy timeout")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            age REAL NOT NULL,
            pace REAL NOT NULL,
            shooting REAL NOT NULL,
            passing REAL NOT NULL,
            dribbling REAL NOT NULL,
            defending REAL NOT NULL,
            physicality REAL NOT NULL,
            height REAL NOT NULL,
            weight REAL NOT NULL,
            tackles REAL NOT NULL,
            interceptions REAL NOT NULL,
            vision REAL NOT NULL,
            ball_control REAL NOT NULL,
            reactions REAL NOT NULL,
            stamina REAL NOT NULL,
            aggression REAL NOT NULL,
            balance REAL NOT NULL,
            composure REAL NOT NULL,
            overall REAL NOT NULL,
            photo_url TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_players_overall ON players(overall);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// One row, one transaction. Nothing is visible unless the commit succeeds.
pub fn insert_player(conn: &mut Connection, player: &NewPlayer) -> Result<i64> {
    if player.name.trim().is_empty() {
        bail!("player name must not be empty");
    }
    if !player.overall.is_finite() {
        bail!("overall must be a finite number");
    }

    let mut values = Vec::with_capacity(PLAYER_DATA_COLUMNS.len());
    values.push(Value::Text(player.name.trim().to_string()));
    values.extend(player.features.values().iter().map(|v| Value::Real(*v)));
    values.push(Value::Real(player.overall));
    values.push(
        player
            .photo_url
            .clone()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    );

    let tx = conn.transaction().context("begin insert transaction")?;
    tx.execute(INSERT_PLAYER_SQL, params_from_iter(values))
        .context("insert player row")?;
    let id = tx.last_insert_rowid();
    tx.commit().context("commit player insert")?;
    Ok(id)
}

pub fn get_player(conn: &Connection, id: i64) -> Result<Option<PlayerRow>> {
    let sql = format!("{SELECT_PLAYER_SQL} WHERE id = ?1");
    conn.query_row(&sql, params![id], player_from_row)
        .optional()
        .with_context(|| format!("load player {id}"))
}

pub fn list_players(conn: &Connection) -> Result<Vec<PlayerRow>> {
    let sql = format!("{SELECT_PLAYER_SQL} ORDER BY id");
    let mut stmt = conn.prepare(&sql).context("prepare player list")?;
    let rows = stmt
        .query_map([], player_from_row)
        .context("query players")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read player rows")?;
    Ok(rows)
}

/// Returns `false` when no row has this id.
pub fn update_player(conn: &mut Connection, id: i64, update: &PlayerUpdate) -> Result<bool> {
    if update.is_empty() {
        bail!("no fields to update");
    }
    let assignments = update
        .changes
        .iter()
        .enumerate()
        .map(|(idx, (column, _))| format!("{column} = ?{}", idx + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE players SET {assignments} WHERE id = ?{}",
        update.changes.len() + 1
    );
    let mut values = update
        .changes
        .iter()
        .map(|(_, v)| v.clone())
        .collect::<Vec<_>>();
    values.push(Value::Integer(id));

    let tx = conn.transaction().context("begin update transaction")?;
    let changed = tx
        .execute(&sql, params_from_iter(values))
        .with_context(|| format!("update player {id}"))?;
    tx.commit().context("commit player update")?;
    Ok(changed > 0)
}

/// Returns `false` when no row has this id.
pub fn delete_player(conn: &mut Connection, id: i64) -> Result<bool> {
    let tx = conn.transaction().context("begin delete transaction")?;
    let changed = tx
        .execute("DELETE FROM players WHERE id = ?1", params![id])
        .with_context(|| format!("delete player {id}"))?;
    tx.commit().context("commit player delete")?;
    Ok(changed > 0)
}

pub fn count_players(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
        .context("count players")
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerRow> {
    let mut values = [0.0; FEATURE_COUNT];
    for (idx, slot) in values.iter_mut().enumerate() {
        *slot = row.get(idx + 2)?;
    }
    let features = FeatureVector::new(values).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Real,
            format!("non-finite feature in player row ({})", FEATURE_NAMES.join(",")).into(),
        )
    })?;
    Ok(PlayerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        features,
        overall: row.get(FEATURE_COUNT + 2)?,
        photo_url: row.get(FEATURE_COUNT + 3)?,
        created_at: row.get(FEATURE_COUNT + 4)?,
    })
}
