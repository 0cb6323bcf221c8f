//! SQLite-based task storage.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use super::migrations;
use crate::error::DatabaseError;
use crate::store::TaskBackend;
use crate::task::{Quadrant, Task, TaskId};

const TASK_COLUMNS: &str =
    "id, title, start_time, end_time, location, note, importance, completed";

fn millis_to_datetime(col: usize, ms: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(col, ms))
}

/// Build a Task from a row selected with [`TASK_COLUMNS`].
fn row_to_task(row: &rusqlite::Row) -> Result<Task, rusqlite::Error> {
    Ok(Task {
        id: TaskId(row.get(0)?),
        title: row.get(1)?,
        start_time: millis_to_datetime(2, row.get(2)?)?,
        end_time: millis_to_datetime(3, row.get(3)?)?,
        location: row.get(4)?,
        note: row.get(5)?,
        importance: Quadrant::from_level(row.get(6)?),
        completed: row.get(7)?,
    })
}

/// SQLite database for task storage.
///
/// The connection is guarded by a mutex so the database can be shared with
/// the store's worker pool.
pub struct TaskDb {
    conn: Mutex<Connection>,
}

impl TaskDb {
    /// Open the task database at `<data_dir>/inkcal.db`.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::OpenFailed {
            path: Default::default(),
            message: e.to_string(),
        })?;
        Self::open_at(dir.join("inkcal.db"))
    }

    /// Open (or create) a database file at `path`.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DatabaseError> {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "cache_size", 1000)?;
        tracing::debug!("sqlite journal mode: {}", mode);

        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("connection mutex poisoned".into()))
    }

    fn query_tasks(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Task>, DatabaseError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {filter} ORDER BY start_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn insert_row(conn: &Connection, task: &Task) -> Result<TaskId, rusqlite::Error> {
        conn.execute(
            "INSERT INTO tasks (title, start_time, end_time, location, note, importance, completed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.title,
                task.start_time.timestamp_millis(),
                task.end_time.timestamp_millis(),
                task.location,
                task.note,
                task.importance.level(),
                task.completed,
            ],
        )?;
        Ok(TaskId(conn.last_insert_rowid()))
    }

    fn update_row(conn: &Connection, task: &Task) -> Result<(), rusqlite::Error> {
        conn.execute(
            "UPDATE tasks
             SET title = ?2, start_time = ?3, end_time = ?4, location = ?5,
                 note = ?6, importance = ?7, completed = ?8
             WHERE id = ?1",
            params![
                task.id.0,
                task.title,
                task.start_time.timestamp_millis(),
                task.end_time.timestamp_millis(),
                task.location,
                task.note,
                task.importance.level(),
                task.completed,
            ],
        )?;
        Ok(())
    }

    /// Number of rows in the tasks table.
    pub fn count(&self) -> Result<usize, DatabaseError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl TaskBackend for TaskDb {
    fn get(&self, id: TaskId) -> Result<Option<Task>, DatabaseError> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.0],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            "WHERE start_time >= ?1 AND start_time < ?2",
            params![start.timestamp_millis(), end.timestamp_millis()],
        )
    }

    fn list_all(&self) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks("", [])
    }

    fn list_by_importance(&self, importance: Quadrant) -> Result<Vec<Task>, DatabaseError> {
        if importance == Quadrant::Unclassified {
            return self.query_tasks("WHERE importance NOT BETWEEN 1 AND 4", []);
        }
        self.query_tasks("WHERE importance = ?1", params![importance.level()])
    }

    fn list_incomplete(&self) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks("WHERE completed = 0", [])
    }

    fn insert(&self, task: &Task) -> Result<TaskId, DatabaseError> {
        let conn = self.conn()?;
        Ok(Self::insert_row(&conn, task)?)
    }

    fn update(&self, task: &Task) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        Ok(Self::update_row(&conn, task)?)
    }

    fn delete(&self, id: TaskId) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    fn insert_all(&self, tasks: &[Task]) -> Result<Vec<TaskId>, DatabaseError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(Self::insert_row(&tx, task)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    fn update_all(&self, tasks: &[Task]) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for task in tasks {
            Self::update_row(&tx, task)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_all(&self, ids: &[TaskId]) -> Result<usize, DatabaseError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx.execute("DELETE FROM tasks WHERE id = ?1", params![id.0])?;
        }
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn make_test_task(title: &str, day: u32, hour: u32) -> Task {
        let start = Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap();
        Task::new(title, start, start + Duration::hours(1))
    }

    #[test]
    fn create_and_get_task() {
        let db = TaskDb::open_memory().unwrap();
        let task = make_test_task("Write report", 1, 9)
            .with_location("Office")
            .with_note("draft first")
            .with_importance(Quadrant::ImportantNotUrgent);
        let id = db.insert(&task).unwrap();
        assert!(id.is_assigned());

        let loaded = db.get(id).unwrap().unwrap();
        let mut expected = task.clone();
        expected.id = id;
        assert_eq!(loaded, expected);
    }

    #[test]
    fn get_missing_task_is_none() {
        let db = TaskDb::open_memory().unwrap();
        assert!(db.get(TaskId(42)).unwrap().is_none());
    }

    #[test]
    fn range_filters_half_open_and_orders_by_start() {
        let db = TaskDb::open_memory().unwrap();
        db.insert(&make_test_task("second", 1, 14)).unwrap();
        db.insert(&make_test_task("first", 1, 8)).unwrap();
        db.insert(&make_test_task("next day", 2, 0)).unwrap();
        db.insert(&make_test_task("previous day", 30, 23)).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let titles: Vec<_> = db
            .range(start, end)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[test]
    fn update_task() {
        let db = TaskDb::open_memory().unwrap();
        let id = db.insert(&make_test_task("Draft", 1, 9)).unwrap();
        let mut task = db.get(id).unwrap().unwrap();
        task.title = "Final".into();
        task.completed = true;
        db.update(&task).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap(), task);
    }

    #[test]
    fn delete_task() {
        let db = TaskDb::open_memory().unwrap();
        let id = db.insert(&make_test_task("Temp", 1, 9)).unwrap();
        db.delete(id).unwrap();
        assert!(db.get(id).unwrap().is_none());
        // deleting again is a no-op
        db.delete(id).unwrap();
    }

    #[test]
    fn list_filters() {
        let db = TaskDb::open_memory().unwrap();
        let mut done = make_test_task("done", 1, 10).with_importance(Quadrant::UrgentImportant);
        done.completed = true;
        db.insert(&done).unwrap();
        db.insert(&make_test_task("open", 1, 11).with_importance(Quadrant::UrgentImportant))
            .unwrap();
        db.insert(&make_test_task("other", 1, 12)).unwrap();

        assert_eq!(db.list_all().unwrap().len(), 3);
        assert_eq!(db.list_by_importance(Quadrant::UrgentImportant).unwrap().len(), 2);
        let open: Vec<_> = db
            .list_incomplete()
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(open, vec!["open", "other"]);
    }

    #[test]
    fn out_of_range_importance_reads_as_unclassified() {
        let db = TaskDb::open_memory().unwrap();
        {
            let conn = db.conn().unwrap();
            conn.execute(
                "INSERT INTO tasks (title, start_time, end_time, importance) VALUES ('odd', 0, 0, 9)",
                [],
            )
            .unwrap();
        }
        let tasks = db.list_by_importance(Quadrant::Unclassified).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].importance, Quadrant::Unclassified);
    }

    #[test]
    fn batch_operations_are_transactional() {
        let db = TaskDb::open_memory().unwrap();
        let tasks: Vec<_> = (0..5).map(|h| make_test_task("batch", 1, h)).collect();
        let ids = db.insert_all(&tasks).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(db.count().unwrap(), 5);

        let mut loaded = db.list_all().unwrap();
        for t in &mut loaded {
            t.completed = true;
        }
        db.update_all(&loaded).unwrap();
        assert!(db.list_incomplete().unwrap().is_empty());

        assert_eq!(db.delete_all(&ids[..3]).unwrap(), 3);
        assert_eq!(db.count().unwrap(), 2);
    }

    #[test]
    fn reopen_file_keeps_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.db");
        let id = {
            let db = TaskDb::open_at(&path).unwrap();
            db.insert(&make_test_task("persisted", 3, 7)).unwrap()
        };
        let db = TaskDb::open_at(&path).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().title, "persisted");
    }
}
