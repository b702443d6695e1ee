use std::sync::Arc;

use async_trait::async_trait;
use lendline_types::{Address, LoanId};

use crate::error::{ConnectError, FinalityError, QueryError, SubmissionError};
use crate::records::{
    FinalityReceipt, LedgerCall, LedgerQuery, PendingTx, QueryResponse, RawLoanRecord,
    RawPaymentRecord, Signer,
};

/// Typed gateway to the authoritative ledger, bound to one caller identity.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Identity every submission is signed as.
    fn caller(&self) -> Address;

    /// Submit a write. Fails on malformed parameters or a rejected simulation.
    async fn submit(&self, call: LedgerCall) -> Result<PendingTx, SubmissionError>;

    /// Block until the write is irreversibly accepted.
    async fn await_finality(&self, pending: &PendingTx) -> Result<FinalityReceipt, FinalityError>;

    async fn query(&self, query: &LedgerQuery) -> Result<QueryResponse, QueryError>;
}

/// Binds ledger clients to signing identities.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn bind(&self, signer: &Signer) -> Result<Arc<dyn LedgerClient>, ConnectError>;
}

/// Typed query helpers over any [`LedgerClient`].
///
/// A response of the wrong shape is reported as [`QueryError::Malformed`].
#[async_trait]
pub trait LedgerQueries {
    async fn loan_count(&self) -> Result<u64, QueryError>;
    async fn get_loan(&self, id: LoanId) -> Result<RawLoanRecord, QueryError>;
    async fn get_loan_payments(&self, id: LoanId) -> Result<Vec<RawPaymentRecord>, QueryError>;
    async fn get_borrower_loans(&self, who: Address) -> Result<Vec<LoanId>, QueryError>;
    async fn get_lender_loans(&self, who: Address) -> Result<Vec<LoanId>, QueryError>;
}

#[async_trait]
impl<T> LedgerQueries for T
where
    T: LedgerClient + ?Sized,
{
    async fn loan_count(&self) -> Result<u64, QueryError> {
        let query = LedgerQuery::LoanCount;
        match self.query(&query).await? {
            QueryResponse::Count(n) => Ok(n),
            other => Err(unexpected(&query, &other)),
        }
    }

    async fn get_loan(&self, id: LoanId) -> Result<RawLoanRecord, QueryError> {
        let query = LedgerQuery::GetLoan(id);
        match self.query(&query).await? {
            QueryResponse::Loan(record) => Ok(record),
            other => Err(unexpected(&query, &other)),
        }
    }

    async fn get_loan_payments(&self, id: LoanId) -> Result<Vec<RawPaymentRecord>, QueryError> {
        let query = LedgerQuery::GetLoanPayments(id);
        match self.query(&query).await? {
            QueryResponse::Payments(payments) => Ok(payments),
            other => Err(unexpected(&query, &other)),
        }
    }

    async fn get_borrower_loans(&self, who: Address) -> Result<Vec<LoanId>, QueryError> {
        let query = LedgerQuery::GetBorrowerLoans(who);
        match self.query(&query).await? {
            QueryResponse::LoanIds(ids) => Ok(ids.into_iter().map(LoanId).collect()),
            other => Err(unexpected(&query, &other)),
        }
    }

    async fn get_lender_loans(&self, who: Address) -> Result<Vec<LoanId>, QueryError> {
        let query = LedgerQuery::GetLenderLoans(who);
        match self.query(&query).await? {
            QueryResponse::LoanIds(ids) => Ok(ids.into_iter().map(LoanId).collect()),
            other => Err(unexpected(&query, &other)),
        }
    }
}

fn unexpected(query: &LedgerQuery, response: &QueryResponse) -> QueryError {
    let shape = match response {
        QueryResponse::Count(_) => "count",
        QueryResponse::Loan(_) => "loan record",
        QueryResponse::Payments(_) => "payment list",
        QueryResponse::LoanIds(_) => "loan id list",
    };
    QueryError::Malformed {
        query: query.to_string(),
        reason: format!("unexpected {shape}"),
    }
}
