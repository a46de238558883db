//! CSV export of a single checklist instance.

use rusqlite::OptionalExtension;

use crate::error::{ChecklistError, Result};
use crate::keyspace::CompletionKey;
use crate::store::{load_instance, ChecklistStore};

impl ChecklistStore {
    /// Render an instance as CSV: one row per item, `Pass` for checked
    /// items and `Not Checked` for the rest.
    pub fn export_csv(&self, key: &str) -> Result<String> {
        let db = self.db_handle().lock().unwrap();
        let instance =
            load_instance(&db, key)?.ok_or_else(|| ChecklistError::NotFound { key: key.into() })?;

        let mut out = String::from("Checklist Type,Task,Status\n");
        for item in &instance.items {
            let comp_key = CompletionKey::new(key, item).format();
            let checked: Option<bool> = db
                .query_row(
                    "SELECT 1 FROM completion WHERE key = ?1",
                    [&comp_key],
                    |_| Ok(true),
                )
                .optional()?;
            let status = if checked.is_some() { "Pass" } else { "Not Checked" };
            out.push_str(&format!(
                "{},{},{}\n",
                csv_field(&instance.name),
                csv_field(item),
                csv_field(status)
            ));
        }
        Ok(out)
    }
}

/// Quote a CSV field, doubling any embedded quotes.
fn csv_field(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn store() -> ChecklistStore {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        init_db(&conn).expect("init schema");
        ChecklistStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn export_marks_checked_items_as_pass() {
        let store = store();
        store.create("Web App").unwrap();
        store.add_item("web-app", "Login works").unwrap();
        store.add_item("web-app", "Logout works").unwrap();
        store.set_checked("web-app", "Login works", true).unwrap();

        let csv = store.export_csv("web-app").unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Checklist Type,Task,Status");
        assert_eq!(lines[1], "\"Web App\",\"Login works\",\"Pass\"");
        assert_eq!(lines[2], "\"Web App\",\"Logout works\",\"Not Checked\"");
    }

    #[test]
    fn export_escapes_embedded_quotes() {
        let store = store();
        store.create("QA").unwrap();
        store.add_item("qa", "Check \"remember me\"").unwrap();
        let csv = store.export_csv("qa").unwrap();
        assert!(csv.contains("\"Check \"\"remember me\"\"\""));
    }

    #[test]
    fn export_unknown_instance_is_not_found() {
        let store = store();
        assert!(matches!(
            store.export_csv("nope").unwrap_err(),
            ChecklistError::NotFound { .. }
        ));
    }
}
