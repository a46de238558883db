use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No template with the given id exists.
    #[error("template not found: {id}")]
    TemplateNotFound { id: String },

    /// A template's source instance no longer resolves. Non-fatal for
    /// `evaluate`: the template is skipped and retried next tick.
    #[error("source instance {source_key} missing for template {template_id}")]
    SourceMissing {
        template_id: String,
        source_key: String,
    },

    #[error(transparent)]
    Checklist(#[from] cadence_checklists::ChecklistError),

    #[error(transparent)]
    Template(#[from] cadence_templates::TemplateError),

    #[error(transparent)]
    Run(#[from] cadence_runs::RunError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
