//! Groups prepared emails by sending account.

use campaign_core::{AccountKey, PreparedEmail};
use std::collections::HashMap;

/// All emails of one sending account, in request order. The account
/// configuration stays on each email; transports read it per send.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBucket {
    pub key: AccountKey,
    pub account_type: String,
    pub emails: Vec<PreparedEmail>,
}

/// Split `emails` into one bucket per account key.
///
/// Buckets are ordered by the first occurrence of their key and keep the
/// input order of their emails, so the result is deterministic and
/// partitioning the concatenated buckets again yields the same buckets.
pub fn partition(emails: Vec<PreparedEmail>) -> Vec<AccountBucket> {
    let mut index: HashMap<AccountKey, usize> = HashMap::new();
    let mut buckets: Vec<AccountBucket> = Vec::new();

    for email in emails {
        let key = email.account_key();
        match index.get(&key) {
            Some(&slot) => buckets[slot].emails.push(email),
            None => {
                index.insert(key.clone(), buckets.len());
                buckets.push(AccountBucket {
                    key,
                    account_type: email.account_type.clone(),
                    emails: vec![email],
                });
            }
        }
    }

    buckets
}
