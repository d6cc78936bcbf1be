//! SQLite persistence for serial configs, register logs and saved registers.
//!
//! `rusqlite::Connection` is not `Sync`, so the store keeps it behind a
//! `Mutex`. Every call is a short statement and runs inline.

pub mod models;

pub use models::*;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::serial::{Parity, StopBits};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS serial_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    port TEXT NOT NULL,
    baudrate INTEGER NOT NULL DEFAULT 115200,
    bytesize INTEGER NOT NULL DEFAULT 8,
    parity TEXT NOT NULL DEFAULT 'N',
    stopbits REAL NOT NULL DEFAULT 1.0,
    timeout REAL NOT NULL DEFAULT 0.05,
    is_active INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS register_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    serial_config_id INTEGER REFERENCES serial_configs(id) ON DELETE SET NULL,
    operation_type TEXT NOT NULL,
    address TEXT NOT NULL,
    value TEXT,
    response TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS saved_registers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    value32bit TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_config ON register_logs (serial_config_id);
";

const MAX_NAME_LEN: usize = 100;
const MAX_PORT_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Address {0} already exists")]
    AddressExists(String),

    #[error("{field} must start with 0x or 0X, got {value}")]
    InvalidHexFormat { field: &'static str, value: String },

    #[error("{field} contains non-hex characters, got {value}")]
    InvalidHexCharacters { field: &'static str, value: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Check a `0x`-prefixed hex string as saved registers require.
pub fn validate_hex(field: &'static str, value: &str) -> Result<()> {
    let Some(digits) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) else {
        return Err(StoreError::InvalidHexFormat {
            field,
            value: value.to_string(),
        });
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidHexCharacters {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn invalid(field: &'static str, message: impl Into<String>) -> StoreError {
    StoreError::Validation {
        field,
        message: message.into(),
    }
}

fn validate_text(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if value.chars().count() > max {
        return Err(invalid(field, format!("at most {} characters", max)));
    }
    Ok(())
}

fn validate_config(config: &NewSerialConfig) -> Result<()> {
    validate_text("name", &config.name, MAX_NAME_LEN)?;
    validate_text("port", &config.port, MAX_PORT_LEN)?;
    if !(300..=4_000_000).contains(&config.baudrate) {
        return Err(invalid("baudrate", format!("{} out of range", config.baudrate)));
    }
    if !(5..=8).contains(&config.bytesize) {
        return Err(invalid("bytesize", format!("{} not in 5..=8", config.bytesize)));
    }
    if StopBits::from_f64(config.stopbits).is_none() {
        return Err(invalid("stopbits", format!("{} is not one of 1, 1.5, 2", config.stopbits)));
    }
    if !(0.01..=10.0).contains(&config.timeout) {
        return Err(invalid("timeout", format!("{} not in 0.01..=10 seconds", config.timeout)));
    }
    if let Some(description) = &config.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(invalid("description", format!("at most {} characters", MAX_DESCRIPTION_LEN)));
        }
    }
    Ok(())
}

fn parity_from_sql(code: String) -> rusqlite::Result<Parity> {
    Parity::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown parity {:?}", code).into(),
        )
    })
}

fn enum_from_sql<T>(text: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unexpected value {:?}", text).into(),
        )
    })
}

fn row_to_config(row: &Row) -> rusqlite::Result<SerialConfig> {
    Ok(SerialConfig {
        id: row.get("id")?,
        name: row.get("name")?,
        port: row.get("port")?,
        baudrate: row.get::<_, i64>("baudrate")? as u32,
        bytesize: row.get::<_, i64>("bytesize")? as u8,
        parity: parity_from_sql(row.get("parity")?)?,
        stopbits: row.get("stopbits")?,
        timeout: row.get("timeout")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_log(row: &Row) -> rusqlite::Result<RegisterLog> {
    Ok(RegisterLog {
        id: row.get("id")?,
        serial_config_id: row.get("serial_config_id")?,
        operation_type: enum_from_sql(row.get("operation_type")?, |s| match s {
            "read" => Some(OperationType::Read),
            "write" => Some(OperationType::Write),
            _ => None,
        })?,
        address: row.get("address")?,
        value: row.get("value")?,
        response: row.get("response")?,
        status: enum_from_sql(row.get("status")?, |s| match s {
            "pending" => Some(LogStatus::Pending),
            "success" => Some(LogStatus::Success),
            "failed" => Some(LogStatus::Failed),
            _ => None,
        })?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_saved(row: &Row) -> rusqlite::Result<SavedRegister> {
    Ok(SavedRegister {
        id: row.get("id")?,
        address: row.get("address")?,
        data: row.get("data")?,
        value32bit: row.get("value32bit")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    invalid("storage path", format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        log::info!("Database opened at {}", path.display());
        Self::with_connection(conn)
    }

    /// Throwaway database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Serial configs

    pub fn create_config(&self, config: &NewSerialConfig) -> Result<SerialConfig> {
        validate_config(config)?;
        let now = Utc::now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO serial_configs
                    (name, port, baudrate, bytesize, parity, stopbits, timeout, is_active, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)",
                params![
                    config.name,
                    config.port,
                    config.baudrate,
                    config.bytesize,
                    config.parity.code(),
                    config.stopbits,
                    config.timeout,
                    config.description,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_config(id)
    }

    pub fn get_config(&self, id: i64) -> Result<SerialConfig> {
        self.conn()
            .query_row("SELECT * FROM serial_configs WHERE id = ?1", params![id], row_to_config)
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "Serial config",
                id,
            })
    }

    pub fn list_configs(&self, skip: i64, limit: i64) -> Result<Page<SerialConfig>> {
        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM serial_configs", [], |r| r.get(0))?;
        let mut stmt = conn.prepare("SELECT * FROM serial_configs ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let items = stmt
            .query_map(params![limit, skip], row_to_config)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    pub fn update_config(&self, id: i64, update: &SerialConfigUpdate) -> Result<SerialConfig> {
        let current = self.get_config(id)?;
        let merged = NewSerialConfig {
            name: update.name.clone().unwrap_or(current.name),
            port: update.port.clone().unwrap_or(current.port),
            baudrate: update.baudrate.unwrap_or(current.baudrate),
            bytesize: update.bytesize.unwrap_or(current.bytesize),
            parity: update.parity.unwrap_or(current.parity),
            stopbits: update.stopbits.unwrap_or(current.stopbits),
            timeout: update.timeout.unwrap_or(current.timeout),
            description: update.description.clone().or(current.description),
        };
        validate_config(&merged)?;

        self.conn().execute(
            "UPDATE serial_configs SET name = ?1, port = ?2, baudrate = ?3, bytesize = ?4, parity = ?5,
                stopbits = ?6, timeout = ?7, description = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                merged.name,
                merged.port,
                merged.baudrate,
                merged.bytesize,
                merged.parity.code(),
                merged.stopbits,
                merged.timeout,
                merged.description,
                Utc::now(),
                id,
            ],
        )?;
        self.get_config(id)
    }

    pub fn delete_config(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM serial_configs WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "Serial config",
                id,
            });
        }
        Ok(())
    }

    /// Mark `id` as the active config; every other config becomes inactive.
    pub fn activate_config(&self, id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("UPDATE serial_configs SET is_active = 0", [])?;
        let updated = tx.execute(
            "UPDATE serial_configs SET is_active = 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "Serial config",
                id,
            });
        }
        tx.commit()?;
        Ok(())
    }

    pub fn deactivate_configs(&self) -> Result<()> {
        self.conn()
            .execute("UPDATE serial_configs SET is_active = 0", [])?;
        Ok(())
    }

    // Register logs

    pub fn add_log(&self, log: &NewRegisterLog) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO register_logs
                (serial_config_id, operation_type, address, value, response, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                log.serial_config_id,
                log.operation_type.as_str(),
                log.address,
                log.value,
                log.response,
                log.status.as_str(),
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first, optionally restricted to one config.
    pub fn list_logs(&self, skip: i64, limit: i64, config_id: Option<i64>) -> Result<Page<RegisterLog>> {
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM register_logs WHERE ?1 IS NULL OR serial_config_id = ?1",
            params![config_id],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT * FROM register_logs
             WHERE ?1 IS NULL OR serial_config_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let items = stmt
            .query_map(params![config_id, limit, skip], row_to_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    // Saved registers

    fn address_taken(conn: &Connection, address: &str, except: Option<i64>) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM saved_registers WHERE address = ?1 AND (?2 IS NULL OR id != ?2)",
                params![address, except],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn create_saved(&self, register: &NewSavedRegister) -> Result<SavedRegister> {
        validate_hex("address", &register.address)?;
        validate_hex("data", &register.data)?;
        validate_hex("value32bit", &register.value32bit)?;

        let id = {
            let conn = self.conn();
            if Self::address_taken(&conn, &register.address, None)? {
                return Err(StoreError::AddressExists(register.address.clone()));
            }
            let now = Utc::now();
            conn.execute(
                "INSERT INTO saved_registers (address, data, value32bit, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    register.address,
                    register.data,
                    register.value32bit,
                    register.description,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_saved(id)
    }

    pub fn get_saved(&self, id: i64) -> Result<SavedRegister> {
        self.conn()
            .query_row("SELECT * FROM saved_registers WHERE id = ?1", params![id], row_to_saved)
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "Saved register",
                id,
            })
    }

    pub fn list_saved(&self, skip: i64, limit: i64) -> Result<Page<SavedRegister>> {
        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM saved_registers", [], |r| r.get(0))?;
        let mut stmt = conn.prepare("SELECT * FROM saved_registers ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let items = stmt
            .query_map(params![limit, skip], row_to_saved)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    pub fn update_saved(&self, id: i64, update: &SavedRegisterUpdate) -> Result<SavedRegister> {
        let current = self.get_saved(id)?;
        if let Some(address) = &update.address {
            validate_hex("address", address)?;
        }
        if let Some(data) = &update.data {
            validate_hex("data", data)?;
        }
        if let Some(value) = &update.value32bit {
            validate_hex("value32bit", value)?;
        }

        let address = update.address.clone().unwrap_or(current.address);
        {
            let conn = self.conn();
            if Self::address_taken(&conn, &address, Some(id))? {
                return Err(StoreError::AddressExists(address));
            }
            conn.execute(
                "UPDATE saved_registers SET address = ?1, data = ?2, value32bit = ?3, description = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    address,
                    update.data.clone().unwrap_or(current.data),
                    update.value32bit.clone().unwrap_or(current.value32bit),
                    update.description.clone().or(current.description),
                    Utc::now(),
                    id,
                ],
            )?;
        }
        self.get_saved(id)
    }

    pub fn delete_saved(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM saved_registers WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "Saved register",
                id,
            });
        }
        Ok(())
    }

    /// Delete every listed id that exists; returns how many rows went away.
    pub fn delete_saved_many(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM saved_registers WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_validation() {
        assert!(validate_hex("address", "0x20470C04").is_ok());
        assert!(matches!(
            validate_hex("address", "20470C04"),
            Err(StoreError::InvalidHexFormat { .. })
        ));
        assert!(matches!(
            validate_hex("data", "0xZZ"),
            Err(StoreError::InvalidHexCharacters { .. })
        ));
    }

    #[test]
    fn test_activate_is_exclusive() {
        let store = Store::in_memory().unwrap();
        let a = store.create_config(&NewSerialConfig::new("a", "/dev/ttyUSB0")).unwrap();
        let b = store.create_config(&NewSerialConfig::new("b", "/dev/ttyUSB1")).unwrap();
        store.activate_config(a.id).unwrap();
        store.activate_config(b.id).unwrap();
        assert!(!store.get_config(a.id).unwrap().is_active);
        assert!(store.get_config(b.id).unwrap().is_active);
    }
}
