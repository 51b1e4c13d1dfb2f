//! Sale orchestration over local inventory and the remote ledger.

pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod reconciler;

pub use error::{LedgerError, Missing, Result, SaleError};
pub use ledger::{
    Adjustment, CustomerAccount, HttpLedgerClient, InMemoryLedger, LedgerClient, LedgerFault,
};
pub use orchestrator::{GoodSummary, SaleOrchestrator, SaleReceipt, SaleRequest};
pub use reconciler::{ReconciliationReport, Reconciler};
