use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::{Result, TemplateError};
use crate::types::{Frequency, Template, TemplateInput};
use cadence_checklists::ChecklistStore;
use cadence_core::types::TemplateId;

/// Store for recurrence templates.
///
/// Validation happens before any write, so a rejected input never
/// leaves partial state behind. Deleting a template never touches the
/// runs it already produced.
pub struct TemplateStore {
    db: Arc<Mutex<Connection>>,
}

impl TemplateStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Validate `input` and insert a new template.
    #[instrument(skip(self, input, checklists), fields(name = %input.name))]
    pub fn create(&self, input: &TemplateInput, checklists: &ChecklistStore) -> Result<Template> {
        let (name, frequency, lead_days, next_due) = validate(input, checklists)?;

        let id = TemplateId::new().0;
        let now = chrono::Utc::now().to_rfc3339();
        let template = Template {
            id: id.clone(),
            name,
            source_key: input.source_key.clone(),
            frequency,
            lead_days,
            next_due,
            created_at: now.clone(),
            updated_at: now,
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO templates
             (id, name, source_key, frequency, lead_days, next_due, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                template.id,
                template.name,
                template.source_key,
                template.frequency.to_string(),
                template.lead_days,
                template.next_due.to_string(),
                template.created_at,
            ],
        )?;
        info!(template_id = %id, "template created");
        Ok(template)
    }

    /// Validate `input` and rewrite an existing template. The id never
    /// changes; already-materialized runs keep their frozen provenance.
    #[instrument(skip(self, input, checklists))]
    pub fn update(
        &self,
        id: &str,
        input: &TemplateInput,
        checklists: &ChecklistStore,
    ) -> Result<Template> {
        let (name, frequency, lead_days, next_due) = validate(input, checklists)?;

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE templates
             SET name = ?1, source_key = ?2, frequency = ?3, lead_days = ?4,
                 next_due = ?5, updated_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                name,
                input.source_key,
                frequency.to_string(),
                lead_days,
                next_due.to_string(),
                now,
                id,
            ],
        )?;
        if n == 0 {
            return Err(TemplateError::NotFound { id: id.into() });
        }
        db.query_row(
            "SELECT id, name, source_key, frequency, lead_days, next_due, created_at, updated_at
             FROM templates WHERE id = ?1",
            [id],
            row_to_template,
        )
        .map_err(TemplateError::Database)
    }

    /// Remove a template. Existing runs and their cloned instances stay.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM templates WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(TemplateError::NotFound { id: id.into() });
        }
        info!(template_id = %id, "template deleted");
        Ok(())
    }

    /// Retrieve a template by id, `None` if it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<Template>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, source_key, frequency, lead_days, next_due, created_at, updated_at
             FROM templates WHERE id = ?1",
            [id],
            row_to_template,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TemplateError::Database(e)),
        }
    }

    /// All templates in creation order.
    pub fn list(&self) -> Result<Vec<Template>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, source_key, frequency, lead_days, next_due, created_at, updated_at
             FROM templates ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_template)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Move a template's next occurrence forward. Called by the
    /// materialization engine after each successful run creation.
    pub fn advance_next_due(&self, id: &str, new_date: NaiveDate) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE templates SET next_due = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_date.to_string(), now, id],
        )?;
        if n == 0 {
            return Err(TemplateError::NotFound { id: id.into() });
        }
        debug!(template_id = %id, next_due = %new_date, "due date advanced");
        Ok(())
    }
}

/// Shared create/update validation. Returns the cleaned fields or the
/// first violation, leaving the store untouched.
fn validate(
    input: &TemplateInput,
    checklists: &ChecklistStore,
) -> Result<(String, Frequency, u32, NaiveDate)> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(TemplateError::Validation("template name is empty".into()));
    }

    let frequency: Frequency = input
        .frequency
        .parse()
        .map_err(TemplateError::Validation)?;

    let next_due = NaiveDate::parse_from_str(&input.next_due, "%Y-%m-%d").map_err(|_| {
        TemplateError::Validation(format!(
            "next due date must be YYYY-MM-DD, got {:?}",
            input.next_due
        ))
    })?;

    let source = checklists
        .get(&input.source_key)?
        .ok_or_else(|| {
            TemplateError::Validation(format!(
                "source instance not found: {}",
                input.source_key
            ))
        })?;
    if source.is_run_instance() {
        return Err(TemplateError::Validation(format!(
            "source instance is a run clone: {}",
            input.source_key
        )));
    }

    // Negative lead windows are clamped, not rejected.
    let lead_days = input.lead_days.max(0) as u32;

    Ok((name.to_string(), frequency, lead_days, next_due))
}

/// Map a SELECT row (id, name, source_key, frequency, lead_days,
/// next_due, created_at, updated_at) to a Template. Corrupt frequency
/// or date text degrades to defaults rather than dropping the row.
fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<Template> {
    let freq_str: String = row.get(3)?;
    let due_str: String = row.get(5)?;
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        source_key: row.get(2)?,
        frequency: freq_str.parse().unwrap_or_default(),
        lead_days: row.get::<_, i64>(4)?.max(0) as u32,
        next_due: NaiveDate::parse_from_str(&due_str, "%Y-%m-%d").unwrap_or_default(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
