// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transaction records.
//!
//! A [`Transaction`] is always directional: `amount` leaves `from` and
//! arrives at `to`. A zero amount records a transfer with no net change.

use crate::base::{AccountId, TransactionId};
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
    reference: String,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id,
            from,
            to,
            amount,
            reference: reference.into(),
        }
    }

    /// Derives a transaction id from the transfer it records.
    ///
    /// The id is `<from>-<to>-<digest>` where the digest covers both ids,
    /// the normalized amount and the reference, so identical transfers map
    /// to identical ids.
    pub fn derive_id(
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
        reference: &str,
    ) -> TransactionId {
        let digest = md5::compute(format!(
            "{}|{}|{}|{}",
            from,
            to,
            amount.normalize(),
            reference
        ));
        let hex = format!("{:x}", digest);
        TransactionId(format!("{}-{}-{}", from, to, &hex[..8]))
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn from(&self) -> &AccountId {
        &self.from
    }

    pub fn to(&self) -> &AccountId {
        &self.to
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction{{id: {}, from: {}, to: {}, amount: {:.2}, reference: '{}'}}",
            self.id,
            self.from,
            self.to,
            self.amount.round_dp(2),
            self.reference
        )
    }
}
