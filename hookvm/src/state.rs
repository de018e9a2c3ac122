// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The state subsystem: key normalization and the write-through cache.
//!
//! Reads on the installing account populate the cache; foreign reads do
//! not. Writes only stage into the cache; the ledger is touched at commit.

use hookvm_abi::{ReturnCode, MAX_HOOK_STATE_SIZE};

use crate::context::HookContext;
use crate::ledger::{AccountId, Hash256};

/// Left-zero-pad a `[1, 32]`-byte key to the canonical 32 bytes.
pub fn make_state_key(source: &[u8]) -> Option<Hash256> {
    if source.is_empty() || source.len() > 32 {
        return None;
    }
    let mut key = [0u8; 32];
    key[32 - source.len()..].copy_from_slice(source);
    Some(Hash256(key))
}

impl HookContext<'_> {
    /// Look up a state value, local or foreign. Local reads consult the
    /// cache first and cache clean misses.
    pub(crate) fn state_read(
        &mut self,
        key_raw: &[u8],
        foreign: Option<AccountId>,
    ) -> Result<Vec<u8>, ReturnCode> {
        let key = make_state_key(key_raw).ok_or(ReturnCode::InvalidArgument)?;

        if foreign.is_none() {
            // a staged delete reads back as an empty value
            if let Some((_, value)) = self.result.changed_state.get(&key) {
                return Ok(value.clone());
            }
        }

        // the invoking hook must still exist
        if self.view.hook_state_data_max(&self.result.account).is_none() {
            return Err(ReturnCode::InternalError);
        }

        let owner = foreign.unwrap_or(self.result.account);
        let value = self
            .view
            .hook_state(&owner, &key)
            .ok_or(ReturnCode::DoesntExist)?;

        if foreign.is_none() {
            self.result
                .changed_state
                .insert(key, (false, value.clone()));
        }
        Ok(value)
    }

    /// Stage a state write; an empty value stages a delete. Returns the
    /// number of bytes accepted.
    pub(crate) fn state_write(&mut self, value: &[u8], key_raw: &[u8]) -> Result<i64, ReturnCode> {
        let key = make_state_key(key_raw).ok_or(ReturnCode::InvalidArgument)?;

        let configured = self
            .view
            .hook_state_data_max(&self.result.account)
            .ok_or(ReturnCode::InternalError)?;
        let limit = configured.min(MAX_HOOK_STATE_SIZE) as usize;
        if value.len() > limit {
            return Err(ReturnCode::TooBig);
        }

        self.result
            .changed_state
            .insert(key, (true, value.to_vec()));
        Ok(value.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_left_zero_padded() {
        let key = make_state_key(b"k").unwrap();
        assert_eq!(key.0[31], b'k');
        assert!(key.0[..31].iter().all(|&b| b == 0));

        let full = make_state_key(&[0xAB; 32]).unwrap();
        assert_eq!(full.0, [0xAB; 32]);

        assert!(make_state_key(&[]).is_none());
        assert!(make_state_key(&[0; 33]).is_none());
    }
}
