//! Prepare/commit hook for callers that want a final veto

use management_model::OperationResponse;

/// Caller's vote on a prepared operation
#[derive(Debug, Default)]
pub struct OperationTransaction {
    committed: Option<bool>,
}

impl OperationTransaction {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Keep the operation's changes
    pub fn commit(&mut self) {
        self.committed = Some(true);
    }

    /// Discard the operation's changes
    pub fn rollback(&mut self) {
        self.committed = Some(false);
    }

    /// Whether `commit` was the last decision. No decision means rollback.
    pub fn is_committed(&self) -> bool {
        self.committed == Some(true)
    }
}

/// Invoked once all stages completed without forcing a rollback, before
/// changes are committed or the response is returned.
pub trait TransactionControl: Send + Sync {
    /// Vote on the prepared operation; `response` is what the caller would
    /// receive on commit.
    fn operation_prepared(&self, transaction: &mut OperationTransaction, response: &OperationResponse);
}

/// Always commits
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitTransactionControl;

impl TransactionControl for CommitTransactionControl {
    fn operation_prepared(&self, transaction: &mut OperationTransaction, _: &OperationResponse) {
        transaction.commit();
    }
}

/// Always rolls back
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackTransactionControl;

impl TransactionControl for RollbackTransactionControl {
    fn operation_prepared(&self, transaction: &mut OperationTransaction, _: &OperationResponse) {
        transaction.rollback();
    }
}
