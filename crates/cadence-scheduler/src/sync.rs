//! Progress sync: reconcile run status with checklist completion.

use tracing::{debug, info};

use crate::error::Result;
use cadence_checklists::ChecklistStore;
use cadence_runs::{RunRegistry, RunStatus};

/// Bring every run's status in line with its checklist progress.
///
/// Both directions: a run at 100% that is not completed gets completed
/// (with a completion timestamp), a completed run that dropped below
/// 100% reopens. Runs whose backing instance no longer exists are
/// skipped. Returns the number of transitions; when nothing changed, no
/// write is issued at all.
pub fn reconcile(checklists: &ChecklistStore, runs: &RunRegistry) -> Result<usize> {
    let mut transitions = 0;

    for run in runs.list()? {
        if checklists.get(&run.instance_key)?.is_none() {
            debug!(run_id = %run.id, "backing instance gone, skipping reconcile");
            continue;
        }
        let progress = checklists.progress(&run.instance_key)?;

        match run.status {
            RunStatus::Pending if progress == 100 => {
                let now = chrono::Utc::now().to_rfc3339();
                runs.set_status(&run.id, RunStatus::Completed, Some(&now))?;
                info!(run_id = %run.id, "run auto-completed (all items checked)");
                transitions += 1;
            }
            RunStatus::Completed if progress < 100 => {
                runs.set_status(&run.id, RunStatus::Pending, None)?;
                info!(run_id = %run.id, progress, "run auto-reopened (item unchecked)");
                transitions += 1;
            }
            _ => {}
        }
    }

    Ok(transitions)
}
