//! Accumulated counter refresh coordination.
//!
//! The refresh folds pending accumulated flow counter deltas into their
//! readable values for the whole device. Only one may be outstanding, and
//! it occupies a transaction slot like any bulk read.

use crate::admission::{RefreshToken, SlotOccupant, TransactionClass, TransactionSlot};
use crate::engine::BulkCounterEngine;
use crate::error::{BulkCounterError, BulkCounterResult, BulkCounterStatus};
use crate::event::{BulkCounterEvent, TransactionStatus};
use crate::types::{Cookie, TransactionId};
use tracing::{debug, info, warn};

impl BulkCounterEngine {
    /// Starts the accumulated counter refresh.
    ///
    /// Ends with exactly one [`BulkCounterEvent::RefreshDone`] carrying
    /// `cookie`.
    ///
    /// # Errors
    ///
    /// `ResourceInUse` if a refresh is already outstanding or no slot may
    /// be taken.
    pub fn refresh_start(&self, cookie: Cookie) -> BulkCounterResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if let Some(token) = state.admission.refresh {
            state.stats.transactions_rejected += 1;
            return Err(BulkCounterError::resource_in_use(format!(
                "refresh {} is outstanding",
                token.txn
            )));
        }
        let index = match state.admission.admit(TransactionClass::Refresh) {
            Ok(index) => index,
            Err(e) => {
                state.stats.transactions_rejected += 1;
                debug!(cookie, error = %e, "refresh rejected");
                return Err(e);
            }
        };

        let txn = state.admission.next_txn_id();
        self.driver.start_refresh(txn)?;

        state.admission.occupy(
            index,
            TransactionSlot {
                txn,
                class: TransactionClass::Refresh,
                occupant: SlotOccupant::Refresh,
            },
        );
        state.admission.refresh = Some(RefreshToken { txn, cookie });
        state.stats.refreshes_started += 1;

        info!(txn = %txn, cookie, "accumulated counter refresh started");
        Ok(())
    }

    pub fn is_refresh_in_progress(&self) -> bool {
        self.state.read().admission.refresh.is_some()
    }

    pub(crate) fn complete_refresh(
        &self,
        txn: TransactionId,
        result: Result<(), BulkCounterStatus>,
    ) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let token = match state.admission.refresh {
            Some(token) if token.txn == txn => token,
            _ => {
                warn!(txn = %txn, "refresh completion for unknown transaction ignored");
                return false;
            }
        };
        state.admission.refresh = None;
        state.admission.release(txn);
        state.stats.refreshes_completed += 1;

        let status = match result {
            Ok(()) => TransactionStatus::Completed,
            Err(status) => TransactionStatus::Failed(status),
        };

        info!(txn = %txn, cookie = token.cookie, status = %status, "accumulated counter refresh done");
        self.emit(BulkCounterEvent::RefreshDone {
            cookie: token.cookie,
            status,
        });
        true
    }
}
