// 8.0: leveraged position record and its pure math. pnl is collateral-denominated:
// size * (price - entry) / entry. funding accrues against the ledger's cumulative
// index snapshot taken at entry.

use crate::fixed;
use crate::types::{Collateral, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: Price,
    // strictly positive while the position is open
    pub margin_deposited: Collateral,
    // collateral-denominated exposure, strictly positive while open
    pub additional_size: Collateral,
    // ledger cumulative funding index at entry (or last settle-into-margin)
    pub entry_cumulative_funding: Decimal,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn new(
        entry_price: Price,
        margin_deposited: Collateral,
        additional_size: Collateral,
        entry_cumulative_funding: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entry_price,
            margin_deposited,
            additional_size,
            entry_cumulative_funding,
            opened_at: timestamp,
            updated_at: timestamp,
        }
    }

    // 8.1: paper gains/losses at the given price, in collateral units.
    pub fn profit_loss(&self, price: Price) -> Collateral {
        let delta = price.value() - self.entry_price.value();
        Collateral::new(fixed::div(
            fixed::mul(self.additional_size.value(), delta),
            self.entry_price.value(),
        ))
    }

    // 8.2: funding accrued to margin since entry. negative while longs pay
    // (the index rises as the long side owes the stable side).
    pub fn accrued_funding(&self, cumulative_funding_now: Decimal) -> Collateral {
        let index_delta = self.entry_cumulative_funding - cumulative_funding_now;
        Collateral::new(fixed::mul(self.additional_size.value(), index_delta))
    }

    // 8.3: margin + pnl + funding. this vs the maintenance requirement decides
    // liquidation; it is also the amount released when the position closes.
    pub fn settled_margin(&self, price: Price, cumulative_funding_now: Decimal) -> Collateral {
        self.margin_deposited
            .add(self.profit_loss(price))
            .add(self.accrued_funding(cumulative_funding_now))
    }

    pub fn leverage(&self) -> Decimal {
        fixed::div(self.additional_size.value(), self.margin_deposited.value())
    }

    /// Fold pending funding into the deposited margin and reset the index
    /// snapshot. Must run before any margin or size mutation.
    pub fn settle_funding_into_margin(&mut self, cumulative_funding_now: Decimal) {
        let accrued = self.accrued_funding(cumulative_funding_now);
        self.margin_deposited = self.margin_deposited.add(accrued);
        self.entry_cumulative_funding = cumulative_funding_now;
    }
}

/// Size-weighted average entry price after a size increase.
pub fn weighted_entry_price(
    old_size: Collateral,
    old_entry: Price,
    added_size: Collateral,
    fill_price: Price,
) -> Price {
    let total = old_size.value() + added_size.value();
    debug_assert!(total > Decimal::ZERO);
    let weighted = fixed::mul(old_size.value(), old_entry.value())
        + fixed::mul(added_size.value(), fill_price.value());
    Price::new_unchecked(fixed::div(weighted, total))
}
