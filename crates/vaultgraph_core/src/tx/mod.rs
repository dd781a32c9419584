//! Transaction coordination.
//!
//! # Responsibility
//! - Define the transaction state machine and the outcomes a transactional
//!   call can end with.
//! - Run a caller callback against a fresh transaction scope: commit on
//!   success, roll back on error or panic, honour manual commit/rollback.
//!
//! # Invariants
//! - `Active -> Committed`, `Active -> RolledBack` and `Active -> Aborted`
//!   are the only transitions; all targets are terminal.
//! - An aborted transaction accepts no further statements, so nothing a
//!   callback runs after the abort can escape into autocommit.
//! - A panic inside the callback is re-raised unchanged after rollback.
//! - A second commit/rollback is reported, never ignored.

use crate::context::Context;
use crate::error::{ErrorKind, RepoError, RepoResult};
use log::{error, warn};
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use thiserror::Error;

mod sqlite;

pub use sqlite::{SqliteTransactionManager, SqliteTx};

/// Lifecycle state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
    /// The backend ended the transaction on its own and discarded its writes.
    Aborted,
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Aborted => "aborted",
        })
    }
}

/// Operation attempted on a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    Commit,
    Rollback,
    Execute,
}

impl Display for TxAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Commit => "commit",
            Self::Rollback => "roll back",
            Self::Execute => "execute on",
        })
    }
}

/// Outcome of a failed transactional call.
#[derive(Debug, Error)]
pub enum TxError {
    /// No transaction could be opened; nothing ran.
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] RepoError),

    /// The callback failed and its writes were rolled back.
    #[error(transparent)]
    Operation(RepoError),

    /// The callback failed and the rollback failed too; writes may be
    /// partially applied.
    #[error("operation failed ({source}) and rollback failed ({rollback}); data may be partially applied")]
    RollbackFailed {
        #[source]
        source: RepoError,
        rollback: RepoError,
    },

    /// The backend aborted the transaction while the callback ran; the callback
    /// then failed. Every write of the transaction was discarded.
    #[error("transaction aborted by the storage backend ({0}); no changes were applied")]
    Aborted(#[source] RepoError),

    /// The callback succeeded but its writes could not be made durable.
    #[error("commit failed: {0}")]
    CommitFailed(#[source] RepoError),
}

impl TxError {
    /// `true` for outcomes operators should be alerted about.
    pub fn is_severe(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Error raised by the callback itself, when that is what failed.
    pub fn operation_error(&self) -> Option<&RepoError> {
        match self {
            Self::Operation(err) | Self::Aborted(err) | Self::RollbackFailed { source: err, .. } => {
                Some(err)
            }
            Self::Begin(_) | Self::CommitFailed(_) => None,
        }
    }

    /// Portable kind of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Begin(err)
            | Self::Operation(err)
            | Self::Aborted(err)
            | Self::CommitFailed(err) => err.kind(),
            Self::RollbackFailed { source, .. } => source.kind(),
        }
    }
}

/// Handle passed to transactional callbacks.
pub trait TxScope {
    type Executor: ?Sized;

    /// Executor bound to this transaction.
    fn executor(&self) -> &Self::Executor;
    /// Commits early; the manager will not commit again.
    fn commit(&self) -> RepoResult<()>;
    /// Rolls back early; the manager will not commit.
    fn rollback(&self) -> RepoResult<()>;
    fn state(&self) -> TxState;
}

/// Runs callbacks inside transactions.
pub trait TransactionManager {
    type Scope: TxScope;

    /// Runs `f` inside a fresh transaction.
    ///
    /// Commits when `f` returns `Ok` without finishing the transaction itself,
    /// rolls back when it returns `Err` or panics. Panics are re-raised.
    fn with_transaction<T, F>(&self, ctx: &Context, f: F) -> Result<T, TxError>
    where
        F: FnOnce(&Self::Scope) -> RepoResult<T>;
}

/// Drives one callback over an open scope. Shared by every manager.
pub(crate) fn drive<S, T, F>(scope: &S, label: &str, f: F) -> Result<T, TxError>
where
    S: TxScope,
    F: FnOnce(&S) -> RepoResult<T>,
{
    match catch_unwind(AssertUnwindSafe(|| f(scope))) {
        Err(payload) => {
            if scope.state() == TxState::Active {
                if let Err(err) = scope.rollback() {
                    error!(
                        "event=tx_rollback module=tx status=error backend={} cause=panic error_code=rollback_failed error={}",
                        label, err
                    );
                }
            }
            warn!("event=tx_panic module=tx status=rolled_back backend={label}");
            resume_unwind(payload)
        }
        Ok(Err(err)) => match scope.state() {
            TxState::Active => match scope.rollback() {
                Ok(()) => Err(TxError::Operation(err)),
                Err(rollback) => {
                    error!(
                        "event=tx_rollback module=tx status=error backend={} error_code=rollback_failed error={}",
                        label, rollback
                    );
                    Err(TxError::RollbackFailed {
                        source: err,
                        rollback,
                    })
                }
            },
            TxState::Aborted => {
                warn!("event=tx_rollback module=tx status=aborted backend={label} error_code=tx_aborted");
                Err(TxError::Aborted(err))
            }
            TxState::Committed | TxState::RolledBack => Err(TxError::Operation(err)),
        },
        Ok(Ok(value)) => match scope.state() {
            TxState::Active => {
                if let Err(err) = scope.commit() {
                    error!(
                        "event=tx_commit module=tx status=error backend={} error_code=commit_failed error={}",
                        label, err
                    );
                    if scope.state() == TxState::Active {
                        if let Err(rollback) = scope.rollback() {
                            error!(
                                "event=tx_rollback module=tx status=error backend={} cause=commit_failed error_code=rollback_failed error={}",
                                label, rollback
                            );
                        }
                    }
                    return Err(TxError::CommitFailed(err));
                }
                Ok(value)
            }
            // The callback swallowed whatever aborted the transaction.
            TxState::Aborted => {
                error!("event=tx_commit module=tx status=error backend={label} error_code=tx_aborted");
                Err(TxError::CommitFailed(RepoError::TransactionState {
                    attempted: TxAction::Commit,
                    state: TxState::Aborted,
                }))
            }
            TxState::Committed | TxState::RolledBack => Ok(value),
        },
    }
}

/// Rejects commit/rollback/execute on a finished transaction.
pub(crate) fn ensure_active(state: TxState, attempted: TxAction) -> RepoResult<()> {
    if state == TxState::Active {
        Ok(())
    } else {
        Err(RepoError::TransactionState { attempted, state })
    }
}

#[cfg(test)]
mod tests {
    use super::{drive, ensure_active, TxAction, TxError, TxScope, TxState};
    use crate::error::ErrorKind;
    use crate::error::{RepoError, RepoResult};
    use std::cell::{Cell, RefCell};

    /// Scope double recording the calls the driver makes.
    struct ScriptedScope {
        state: Cell<TxState>,
        fail_commit: bool,
        fail_rollback: bool,
        calls: RefCell<Vec<&'static str>>,
    }

    impl ScriptedScope {
        fn new(fail_commit: bool, fail_rollback: bool) -> Self {
            Self {
                state: Cell::new(TxState::Active),
                fail_commit,
                fail_rollback,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl TxScope for ScriptedScope {
        type Executor = ();

        fn executor(&self) -> &() {
            &()
        }

        fn commit(&self) -> RepoResult<()> {
            ensure_active(self.state.get(), TxAction::Commit)?;
            self.calls.borrow_mut().push("commit");
            if self.fail_commit {
                return Err(RepoError::generic("disk full"));
            }
            self.state.set(TxState::Committed);
            Ok(())
        }

        fn rollback(&self) -> RepoResult<()> {
            ensure_active(self.state.get(), TxAction::Rollback)?;
            self.calls.borrow_mut().push("rollback");
            if self.fail_rollback {
                return Err(RepoError::generic("connection lost"));
            }
            self.state.set(TxState::RolledBack);
            Ok(())
        }

        fn state(&self) -> TxState {
            self.state.get()
        }
    }

    #[test]
    fn success_commits_once() {
        let scope = ScriptedScope::new(false, false);
        let value = drive(&scope, "test", |_| Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert_eq!(*scope.calls.borrow(), vec!["commit"]);
        assert_eq!(scope.state(), TxState::Committed);
    }

    #[test]
    fn error_rolls_back_and_returns_original_error() {
        let scope = ScriptedScope::new(false, false);
        let err = drive(&scope, "test", |_| -> RepoResult<()> {
            Err(RepoError::validation("title", "must not be empty"))
        })
        .unwrap_err();
        assert!(matches!(err, TxError::Operation(RepoError::Validation { .. })));
        assert!(!err.is_severe());
        assert_eq!(*scope.calls.borrow(), vec!["rollback"]);
    }

    #[test]
    fn failed_rollback_is_reported_as_severe() {
        let scope = ScriptedScope::new(false, true);
        let err = drive(&scope, "test", |_| -> RepoResult<()> {
            Err(RepoError::generic("write failed"))
        })
        .unwrap_err();
        assert!(err.is_severe());
        assert!(err.to_string().contains("partially applied"));
        assert!(err.operation_error().is_some());
    }

    #[test]
    fn failed_commit_is_distinct_from_callback_failure() {
        let scope = ScriptedScope::new(true, false);
        let err = drive(&scope, "test", |_| Ok(())).unwrap_err();
        assert!(matches!(err, TxError::CommitFailed(_)));
        assert!(err.operation_error().is_none());
        assert_eq!(*scope.calls.borrow(), vec!["commit", "rollback"]);
    }

    #[test]
    fn manual_commit_is_not_repeated_and_double_commit_is_reported() {
        let scope = ScriptedScope::new(false, false);
        drive(&scope, "test", |tx| {
            tx.commit()?;
            let second = tx.commit().unwrap_err();
            assert!(matches!(
                second,
                RepoError::TransactionState {
                    attempted: TxAction::Commit,
                    state: TxState::Committed
                }
            ));
            let late_rollback = tx.rollback().unwrap_err();
            assert!(matches!(late_rollback, RepoError::TransactionState { .. }));
            Ok(())
        })
        .unwrap();
        assert_eq!(*scope.calls.borrow(), vec!["commit"]);
    }

    #[test]
    fn manual_rollback_then_ok_does_not_commit() {
        let scope = ScriptedScope::new(false, false);
        drive(&scope, "test", |tx| tx.rollback()).unwrap();
        assert_eq!(scope.state(), TxState::RolledBack);
        assert_eq!(*scope.calls.borrow(), vec!["rollback"]);
    }

    #[test]
    fn failed_rollback_after_failed_commit_is_logged_not_masked() {
        let scope = ScriptedScope::new(true, true);
        let err = drive(&scope, "test", |_| Ok(())).unwrap_err();
        assert!(matches!(err, TxError::CommitFailed(RepoError::Generic { .. })));
        assert_eq!(*scope.calls.borrow(), vec!["commit", "rollback"]);
    }

    #[test]
    fn backend_abort_is_reported_without_rollback() {
        let scope = ScriptedScope::new(false, false);
        let err = drive(&scope, "test", |tx| -> RepoResult<()> {
            tx.state.set(TxState::Aborted);
            Err(RepoError::DeadlineExceeded)
        })
        .unwrap_err();
        assert!(matches!(err, TxError::Aborted(RepoError::DeadlineExceeded)));
        assert!(!err.is_severe());
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(scope.calls.borrow().is_empty());
    }

    #[test]
    fn swallowed_abort_fails_the_commit() {
        let scope = ScriptedScope::new(false, false);
        let err = drive(&scope, "test", |tx| {
            tx.state.set(TxState::Aborted);
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            TxError::CommitFailed(RepoError::TransactionState {
                attempted: TxAction::Commit,
                state: TxState::Aborted
            })
        ));
        assert!(scope.calls.borrow().is_empty());
    }

    #[test]
    fn panic_rolls_back_and_propagates_payload() {
        let scope = ScriptedScope::new(false, false);
        let payload = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = drive(&scope, "test", |_| -> RepoResult<()> { panic!("boom") });
        }))
        .unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
        assert_eq!(scope.state(), TxState::RolledBack);
    }
}
