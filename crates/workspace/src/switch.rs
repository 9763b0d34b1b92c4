use std::path::Path;

use tideline_crypto::Digest;
use tideline_history::{Mmr, TimelineRegistry};
use tideline_index::IndexBuilder;
use tideline_store::{Cancel, ContentStore};
use tracing::{debug, info_span};

use crate::{
    materialize, scan_workspace, ApplyReport, ScanOptions, Shelf, ShelfStore, StageList,
    WorkspaceError,
};

/// Phases of the switch state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    Idle,
    Shelving,
    Diffing,
    Applying,
    Unshelving,
}

/// Collaborators and knobs for one switch.
pub struct SwitchContext<'a> {
    pub store: &'a dyn ContentStore,
    pub work_dir: &'a Path,
    pub shelves: &'a ShelfStore,
    pub stage: &'a StageList,
    /// When false, a dirty workspace makes the switch fail instead of
    /// auto-shelving.
    pub autoshelf: bool,
    /// Root of the last known workspace index, for the scan fast path.
    pub prev_index: Option<Digest>,
    pub pool_size: Option<usize>,
    pub now: i64,
    pub cancel: &'a Cancel,
}

/// What a completed switch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub from: String,
    pub to: String,
    pub shelved: bool,
    pub restored_staged: Vec<String>,
    pub report: ApplyReport,
    /// Index root the working directory now corresponds to.
    pub workspace_root: Digest,
}

/// Root of the empty directory index.
pub(crate) fn empty_index_root(
    store: &dyn ContentStore,
    cancel: &Cancel,
) -> Result<Digest, WorkspaceError> {
    Ok(IndexBuilder::new().build(store, cancel)?)
}

/// Moves the working directory from the active timeline to `target`.
///
/// Shelve, diff, apply, unshelve: uncommitted work on the outgoing timeline
/// is captured as its auto-shelf, the target's content (its own auto-shelf
/// when one exists, its head otherwise) is materialized, and the target's
/// staged list is restored. The active pointer moves only after every phase
/// has completed; a failed apply unwinds and leaves the previously written
/// shelf in place for recovery.
pub fn switch(
    ctx: &SwitchContext<'_>,
    registry: &TimelineRegistry,
    mmr: &Mmr,
    target: &str,
) -> Result<SwitchOutcome, WorkspaceError> {
    let from = registry.active()?;
    let target_record = registry.get(target)?;

    let span = info_span!("switch", %from, to = target);
    let _guard = span.enter();

    if from == target {
        let workspace_root = scan_workspace(
            ctx.store,
            ctx.work_dir,
            &ScanOptions {
                prev_index: ctx.prev_index,
                pool_size: ctx.pool_size,
            },
            ctx.cancel,
        )?;
        return Ok(SwitchOutcome {
            from: from.clone(),
            to: from,
            shelved: false,
            restored_staged: Vec::new(),
            report: ApplyReport::default(),
            workspace_root,
        });
    }

    debug!(phase = ?SwitchPhase::Shelving);
    let outgoing = registry.get(&from)?;
    let workspace_root = scan_workspace(
        ctx.store,
        ctx.work_dir,
        &ScanOptions {
            prev_index: ctx.prev_index,
            pool_size: ctx.pool_size,
        },
        ctx.cancel,
    )?;
    let base_root = match outgoing.head {
        Some(idx) => mmr.get_leaf(idx)?.directory_root,
        None => empty_index_root(ctx.store, ctx.cancel)?,
    };
    let staged = ctx.stage.load()?;
    let dirty = workspace_root != base_root || !staged.is_empty();

    let mut shelved = false;
    if dirty {
        if !ctx.autoshelf {
            return Err(WorkspaceError::PreconditionFailed(format!(
                "timeline `{from}` has uncommitted changes and auto-shelving is disabled"
            )));
        }
        ctx.shelves.save(&Shelf {
            id: Shelf::auto_id(&from),
            timeline: from.clone(),
            created_at: ctx.now,
            workspace_index: workspace_root,
            base_index: base_root,
            staged_paths: staged,
            auto_created: true,
        })?;
        ctx.stage.clear()?;
        shelved = true;
    }

    debug!(phase = ?SwitchPhase::Diffing);
    let incoming_shelf = ctx.shelves.auto_shelf_for(target)?;
    let target_root = match &incoming_shelf {
        Some(shelf) => shelf.workspace_index,
        None => match target_record.head {
            Some(idx) => mmr.get_leaf(idx)?.directory_root,
            None => empty_index_root(ctx.store, ctx.cancel)?,
        },
    };

    debug!(phase = ?SwitchPhase::Applying);
    let report = materialize(
        ctx.store,
        ctx.work_dir,
        &workspace_root,
        &target_root,
        ctx.cancel,
    )?;

    debug!(phase = ?SwitchPhase::Unshelving);
    let mut restored_staged = Vec::new();
    if let Some(shelf) = incoming_shelf {
        ctx.stage.save(&shelf.staged_paths)?;
        ctx.shelves.remove(&shelf.id)?;
        restored_staged = shelf.staged_paths;
    }

    registry.set_active(target)?;
    debug!(phase = ?SwitchPhase::Idle, "switch complete");

    Ok(SwitchOutcome {
        from,
        to: target.to_string(),
        shelved,
        restored_staged,
        report,
        workspace_root: target_root,
    })
}
