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

//! Thread-safe account registry.

use crate::account::Account;
use crate::base::AccountId;
use crate::error::RegistryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Maps account ids to account handles.
///
/// Backed by a [`DashMap`], whose shards are read/write locked: lookups run
/// concurrently, registrations take a shard exclusively. Entries are never
/// removed.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: DashMap<AccountId, Account>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `account`, replacing any handle registered under the same id.
    pub fn register(&self, account: Account) {
        self.accounts.insert(account.id().clone(), account);
    }

    /// Inserts `account` unless its id is already taken.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateAccount`] if the id is registered.
    pub fn register_new(&self, account: Account) -> Result<(), RegistryError> {
        // Entry API keeps the check and the insert atomic.
        match self.accounts.entry(account.id().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateAccount(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(account);
                Ok(())
            }
        }
    }

    /// Looks up an account handle.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownAccount`] if no account has this id.
    pub fn get(&self, id: &str) -> Result<Account, RegistryError> {
        self.accounts
            .get(id)
            .map(|account| account.value().clone())
            .ok_or_else(|| RegistryError::UnknownAccount(AccountId::from(id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    /// Snapshot of all registered accounts, in no particular order.
    pub fn list(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
