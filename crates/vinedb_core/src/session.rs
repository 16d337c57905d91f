//! Sessions and nested transaction scopes.
//!
//! A session runs one physical [`Transaction`] at a time. Calling
//! [`Session::begin`] while a transaction is active opens a nested scope,
//! which only counts depth: commits of inner scopes are logical and the
//! physical commit happens when the outermost scope commits.
//!
//! A rollback at any depth rolls back the physical transaction at once.
//! The scopes still open above it are outstanding: until each of them has
//! been closed with `commit` or `rollback`, the session refuses work with
//! [`CoreError::Rollback`].

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use crate::types::SequenceNumber;

/// Nesting state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transaction.
    Idle,
    /// A physical transaction with `depth` open scopes.
    Active {
        /// Open scopes, at least 1.
        depth: u32,
    },
    /// The physical transaction was rolled back from a nested scope;
    /// `remaining` outer scopes must still be closed.
    Invalidated {
        /// Scopes still to close.
        remaining: u32,
    },
}

/// A single-threaded unit of work against a [`Database`].
#[derive(Debug)]
pub struct Session<'db> {
    db: &'db Database,
    state: SessionState,
    txn: Option<Transaction>,
}

impl<'db> Session<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            state: SessionState::Idle,
            txn: None,
        }
    }

    /// Returns the nesting state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the number of open scopes.
    #[must_use]
    pub fn depth(&self) -> u32 {
        match self.state {
            SessionState::Idle => 0,
            SessionState::Active { depth } => depth,
            SessionState::Invalidated { remaining } => remaining,
        }
    }

    /// Returns true if a physical transaction is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    /// Opens a scope, starting a physical transaction if none is running.
    pub fn begin(&mut self) -> CoreResult<()> {
        match self.state {
            SessionState::Idle => {
                self.txn = Some(self.db.begin()?);
                self.state = SessionState::Active { depth: 1 };
            }
            SessionState::Active { depth } => {
                if depth >= self.db.config().max_nesting_depth {
                    return Err(CoreError::invalid_operation(format!(
                        "transaction nesting deeper than {}",
                        self.db.config().max_nesting_depth
                    )));
                }
                self.state = SessionState::Active { depth: depth + 1 };
            }
            SessionState::Invalidated { remaining } => {
                return Err(invalidated(remaining));
            }
        }
        tracing::debug!(depth = self.depth(), "session begin");
        Ok(())
    }

    /// Closes a scope.
    ///
    /// Returns the commit sequence when this closed the outermost scope and
    /// published the transaction, `None` for a nested scope.
    pub fn commit(&mut self) -> CoreResult<Option<SequenceNumber>> {
        match self.state {
            SessionState::Idle => Err(CoreError::NoActiveTransaction),
            SessionState::Active { depth } if depth > 1 => {
                self.state = SessionState::Active { depth: depth - 1 };
                tracing::debug!(depth = depth - 1, "session nested commit");
                Ok(None)
            }
            SessionState::Active { .. } => {
                self.state = SessionState::Idle;
                let txn = self.txn.take().ok_or(CoreError::NoActiveTransaction)?;
                txn.commit().map(Some)
            }
            SessionState::Invalidated { remaining } => {
                self.consume_scope(remaining);
                Err(invalidated(remaining))
            }
        }
    }

    /// Rolls back the physical transaction, whatever the depth.
    pub fn rollback(&mut self) -> CoreResult<()> {
        match self.state {
            SessionState::Idle => Err(CoreError::NoActiveTransaction),
            SessionState::Active { depth } => {
                if let Some(txn) = self.txn.take() {
                    txn.rollback();
                }
                self.state = if depth > 1 {
                    SessionState::Invalidated {
                        remaining: depth - 1,
                    }
                } else {
                    SessionState::Idle
                };
                tracing::debug!(depth, "session rollback");
                Ok(())
            }
            SessionState::Invalidated { remaining } => {
                self.consume_scope(remaining);
                Ok(())
            }
        }
    }

    /// The physical transaction of the open scopes.
    pub fn transaction(&mut self) -> CoreResult<&mut Transaction> {
        match self.state {
            SessionState::Invalidated { remaining } => Err(invalidated(remaining)),
            _ => self.txn.as_mut().ok_or(CoreError::NoActiveTransaction),
        }
    }

    fn consume_scope(&mut self, remaining: u32) {
        self.state = if remaining > 1 {
            SessionState::Invalidated {
                remaining: remaining - 1,
            }
        } else {
            SessionState::Idle
        };
    }
}

fn invalidated(remaining: u32) -> CoreError {
    CoreError::rollback(format!(
        "transaction was rolled back in a nested scope; {remaining} scope(s) still open"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::RecordId;
    use crate::value::Value;

    fn create_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_class("Doc").unwrap();
        db
    }

    fn insert(session: &mut Session<'_>, title: &str) -> RecordId {
        let record = session.transaction().unwrap().new_record("Doc").unwrap();
        record.set_property("title", title);
        record.id()
    }

    #[test]
    fn nested_commit_is_logical() {
        let db = create_db();
        let mut session = db.session();
        session.begin().unwrap();
        session.begin().unwrap();
        let rid = insert(&mut session, "a");

        assert_eq!(session.commit().unwrap(), None);
        assert_eq!(session.depth(), 1);
        assert_eq!(db.committed_seq(), SequenceNumber::new(0));

        assert!(session.commit().unwrap().is_some());
        assert_eq!(session.state(), SessionState::Idle);

        let mut txn = db.begin().unwrap();
        assert_eq!(txn.load(rid).unwrap().property("title"), Some(&Value::from("a")));
    }

    #[test]
    fn nested_rollback_invalidates_outer_scopes() {
        let db = create_db();
        let mut session = db.session();
        for _ in 0..3 {
            session.begin().unwrap();
        }
        insert(&mut session, "lost");
        session.rollback().unwrap();
        assert_eq!(session.state(), SessionState::Invalidated { remaining: 2 });
        assert_eq!(db.active_transactions(), 0);

        assert!(matches!(session.begin(), Err(CoreError::Rollback { .. })));
        assert!(matches!(session.transaction(), Err(CoreError::Rollback { .. })));
        assert!(matches!(session.commit(), Err(CoreError::Rollback { .. })));
        assert_eq!(session.state(), SessionState::Invalidated { remaining: 1 });
        session.rollback().unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        session.begin().unwrap();
        insert(&mut session, "kept");
        assert!(session.commit().unwrap().is_some());
        assert_eq!(db.stats().live_records, 1);
    }

    #[test]
    fn commit_without_begin_fails() {
        let db = create_db();
        let mut session = db.session();
        assert!(matches!(session.commit(), Err(CoreError::NoActiveTransaction)));
        assert!(matches!(session.rollback(), Err(CoreError::NoActiveTransaction)));
        assert!(matches!(session.transaction(), Err(CoreError::NoActiveTransaction)));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let db = Database::open_with_config(Config::default().max_nesting_depth(2)).unwrap();
        let mut session = db.session();
        session.begin().unwrap();
        session.begin().unwrap();
        assert!(matches!(session.begin(), Err(CoreError::InvalidOperation { .. })));
        assert_eq!(session.depth(), 2);
    }

    #[test]
    fn failed_commit_leaves_session_idle() {
        let db = create_db();
        let mut setup = db.session();
        setup.begin().unwrap();
        let rid = insert(&mut setup, "a");
        setup.commit().unwrap();

        let mut first = db.session();
        let mut second = db.session();
        first.begin().unwrap();
        second.begin().unwrap();
        first.transaction().unwrap().load(rid).unwrap().set_property("title", "b");
        second.transaction().unwrap().load(rid).unwrap().set_property("title", "c");
        first.commit().unwrap();

        assert!(matches!(second.commit(), Err(CoreError::Conflict { .. })));
        assert_eq!(second.state(), SessionState::Idle);
        second.begin().unwrap();
    }
}
