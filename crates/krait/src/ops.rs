//! High level operations that wire the index, the solver, the planner and
//! the link engine together into the flow of a typical request.

use std::path::Path;

use krait_cache::{FetchProvider, PackageCache};
use krait_conda_types::history::{History, HistoryError, UserRequest};
use krait_conda_types::{MatchSpec, ParseMatchSpecError, PinnedSpecs, Platform};
use krait_index::Index;
use krait_solve::{SolveError, SolverOptions, SolverTask};

use crate::install::{execute_transaction, InstallOptions, LinkError};
use crate::prefix::{PrefixData, PrefixDataError};
use crate::transaction::{Transaction, TransactionError};

/// An error from a high level operation.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// A spec given by the user could not be parsed. Maps to the "invalid
    /// usage" exit status.
    #[error(transparent)]
    InvalidSpec(#[from] ParseMatchSpecError),

    /// Loading prefix metadata failed.
    #[error(transparent)]
    Prefix(#[from] PrefixDataError),

    /// Reading the history ledger failed.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The solver failed.
    #[error(transparent)]
    Solve(#[from] SolveError),

    /// Planning the transaction failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Executing the transaction failed.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// The outcome of planning an install: the loaded prefix state and the
/// transaction that brings it to the solved target.
pub struct InstallPlan {
    /// The prefix state loaded while planning.
    pub prefix_data: PrefixData,

    /// The ordered plan. Empty when the environment is already in the
    /// target state.
    pub transaction: Transaction,
}

/// Resolves the given specs against the index and plans the transaction for
/// the prefix, without touching the prefix. This is the dry-run surface:
/// [`Transaction::summary`] renders the plan.
pub fn plan_install(
    index: &Index,
    prefix: &Path,
    specs: Vec<MatchSpec>,
    platform: Platform,
    options: SolverOptions,
) -> Result<InstallPlan, OpsError> {
    let prefix_data = PrefixData::load(prefix)?;

    // Merge the request with the ledger: specs the user asked for earlier
    // stay constraints, unless this request overrides the same name.
    let history = History::new(prefix).parse()?;
    let mut merged = specs;
    for earlier in history.requested_specs()? {
        let name = earlier.name.as_ref();
        if name.is_some() && !merged.iter().any(|spec| spec.name.as_ref() == name) {
            merged.push(earlier);
        }
    }

    let pinned = PinnedSpecs::from_prefix(prefix)?;

    let force_reinstall = options.force_reinstall;
    let task = SolverTask {
        index,
        installed: prefix_data.records().cloned().collect(),
        specs: merged,
        pinned: pinned.specs,
        platform,
        options,
        cancel: None,
    };
    let result = krait_solve::solve(&task)?;

    let transaction = Transaction::from_current_and_desired(
        prefix_data.records().cloned().collect(),
        result.records,
        force_reinstall,
        platform,
    )?;

    Ok(InstallPlan {
        prefix_data,
        transaction,
    })
}

/// Runs a full install request: plan, execute, and append the history
/// revision. Returns the executed transaction.
#[allow(clippy::too_many_arguments)]
pub fn install(
    index: &Index,
    prefix: &Path,
    specs: Vec<MatchSpec>,
    platform: Platform,
    solver_options: SolverOptions,
    cache: &PackageCache,
    provider: &dyn FetchProvider,
    mut install_options: InstallOptions,
) -> Result<Transaction, OpsError> {
    let spec_strings: Vec<String> = specs.iter().map(ToString::to_string).collect();

    let InstallPlan {
        mut prefix_data,
        transaction,
    } = plan_install(index, prefix, specs.clone(), platform, solver_options)?;

    if transaction.is_empty() {
        return Ok(transaction);
    }

    install_options.requested_specs = specs;
    if install_options.history_request.is_none() {
        install_options.history_request = Some(UserRequest {
            date: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            cmd: Some(format!("krait install {}", spec_strings.join(" "))),
            action: Some("install".to_owned()),
            update_specs: spec_strings,
            remove_specs: vec![],
            channels: vec![],
        });
    }

    execute_transaction(
        &transaction,
        &mut prefix_data,
        cache,
        provider,
        &install_options,
    )?;

    // Make the environment discoverable for `list all environments`.
    if let Err(e) = crate::env_registry::EnvironmentsRegistry::default_location()
        .and_then(|registry| registry.register(prefix))
    {
        tracing::debug!("could not register environment: {e}");
    }

    Ok(transaction)
}
