mod helpers;
mod import;
mod intake;
mod source;
mod summary;
mod target;
mod user;

use anyhow::{Result, bail};

use whey_core::models::ProteinSource;
use whey_core::{TrackerError, TrackerService};

use helpers::print_source_table;

pub(crate) use helpers::json_error;
pub(crate) use import::cmd_import;
pub(crate) use intake::{cmd_delete, cmd_intakes, cmd_log, cmd_update};
pub(crate) use source::{cmd_source_add, cmd_source_delete, cmd_source_list, cmd_source_update};
pub(crate) use summary::{cmd_dashboard, cmd_summary_generate, cmd_summary_list, cmd_summary_range};
pub(crate) use target::{cmd_target_delete, cmd_target_list, cmd_target_set, cmd_target_show};
pub(crate) use user::{
    cmd_user_add, cmd_user_email, cmd_user_list, cmd_user_show, cmd_user_token, cmd_user_weight,
};

/// Resolve a source by numeric ID, exact name, or a search that matches exactly one source.
pub(super) fn resolve_source(svc: &TrackerService, query: &str) -> Result<ProteinSource> {
    if let Ok(id) = query.trim().parse::<i64>() {
        return Ok(svc.get_source(id)?);
    }

    match svc.find_source(query) {
        Ok(source) => return Ok(source),
        Err(TrackerError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let mut matches = svc.list_sources(Some(query))?;
    match matches.len() {
        0 => bail!("No source found for '{query}'. Add it with `whey source add`"),
        1 => Ok(matches.remove(0)),
        n => {
            print_source_table(&matches);
            bail!("'{query}' matches {n} sources. Use the source ID or full name")
        }
    }
}
