//! Breach-lookup contract.
//!
//! The network service that answers "is this password in a breach corpus?"
//! lives outside this crate; [`BreachLookup`] is the seam. [`check_breaches`]
//! runs one pass over the opted-in accounts under a deadline and a
//! cancellation signal. Any failure yields [`LeakStatus::Unknown`]: the
//! leaked-password rule is then skipped, never reported as "safe".

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use keyward_core::{Account, AccountOption};
use thiserror::Error;

/// Why a lookup pass produced no answer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    /// The collaborator failed (network, rate limit, bad response).
    #[error("breach lookup unavailable: {0}")]
    Unavailable(String),

    #[error("breach lookup timed out")]
    TimedOut,

    #[error("breach lookup cancelled")]
    Cancelled,
}

/// External breach corpus.
#[async_trait]
pub trait BreachLookup: Send + Sync {
    /// Whether `password` appears in the corpus.
    async fn is_breached(&self, password: &str) -> Result<bool, LookupError>;
}

/// Outcome of a lookup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeakStatus {
    /// No trustworthy answer; the leaked-password rule must not fire.
    Unknown,
    /// Ids of accounts whose password was found.
    Checked(BTreeSet<String>),
}

impl LeakStatus {
    #[must_use]
    pub fn is_leaked(&self, account_id: &str) -> bool {
        match self {
            Self::Unknown => false,
            Self::Checked(ids) => ids.contains(account_id),
        }
    }
}

/// Look up every account that opted into leak warnings.
///
/// Each distinct password is queried once. The whole pass must finish
/// within `timeout` and before `cancel` resolves.
pub async fn check_breaches<L, C>(
    lookup: &L,
    accounts: &[Account],
    timeout: Duration,
    cancel: C,
) -> LeakStatus
where
    L: BreachLookup + ?Sized,
    C: Future<Output = ()>,
{
    match lookup_all(lookup, accounts, timeout, cancel).await {
        Ok(ids) => {
            tracing::debug!(leaked = ids.len(), "breach lookup complete");
            LeakStatus::Checked(ids)
        }
        Err(e) => {
            tracing::warn!("leaked-password check skipped: {e}");
            LeakStatus::Unknown
        }
    }
}

async fn lookup_all<L, C>(
    lookup: &L,
    accounts: &[Account],
    timeout: Duration,
    cancel: C,
) -> Result<BTreeSet<String>, LookupError>
where
    L: BreachLookup + ?Sized,
    C: Future<Output = ()>,
{
    let candidates: Vec<&Account> = accounts
        .iter()
        .filter(|a| a.options.contains(AccountOption::WarnIfPasswordLeaked))
        .collect();
    if candidates.is_empty() {
        return Ok(BTreeSet::new());
    }

    let pass = async {
        let mut verdicts: HashMap<[u8; 32], bool> = HashMap::new();
        let mut leaked = BTreeSet::new();
        for account in candidates {
            let key: [u8; 32] = blake3::hash(account.password.as_bytes()).into();
            let breached = if let Some(known) = verdicts.get(&key) {
                *known
            } else {
                let verdict = lookup.is_breached(&account.password).await?;
                verdicts.insert(key, verdict);
                verdict
            };
            if breached {
                leaked.insert(account.id.clone());
            }
        }
        Ok::<_, LookupError>(leaked)
    };

    tokio::select! {
        biased;
        () = cancel => Err(LookupError::Cancelled),
        result = tokio::time::timeout(timeout, pass) => {
            result.map_err(|_| LookupError::TimedOut)?
        }
    }
}

/// A future that never resolves, for callers with nothing to cancel on.
pub fn never_cancelled() -> impl Future<Output = ()> {
    std::future::pending()
}

// ---------------------------------------------------------------------------
// Offline corpus
// ---------------------------------------------------------------------------

/// In-memory corpus of BLAKE3 password digests.
///
/// Useful offline (imported breach lists) and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticBreachCorpus {
    digests: HashSet<[u8; 32]>,
}

impl StaticBreachCorpus {
    pub fn from_passwords<I, P>(passwords: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        Self {
            digests: passwords
                .into_iter()
                .map(|p| blake3::hash(p.as_ref().as_bytes()).into())
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[async_trait]
impl BreachLookup for StaticBreachCorpus {
    async fn is_breached(&self, password: &str) -> Result<bool, LookupError> {
        let digest: [u8; 32] = blake3::hash(password.as_bytes()).into();
        Ok(self.digests.contains(&digest))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use keyward_core::{fields, Database, Item};

    use super::*;

    fn accounts() -> Vec<Account> {
        let mut db = Database::new();
        for (id, password, options) in [
            ("a", "hunter2", "warn_if_password_leaked"),
            ("b", "hunter2", "warn_if_password_leaked"),
            ("c", "hunter2", ""),
            ("d", "Zq!9-long-unique", "warn_if_password_leaked"),
        ] {
            db.insert(
                Item::new(id)
                    .with_field(fields::PASSWORD, password)
                    .with_field(fields::OPTIONS, options),
            );
        }
        db.accounts()
    }

    struct Counting {
        inner: StaticBreachCorpus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BreachLookup for Counting {
        async fn is_breached(&self, password: &str) -> Result<bool, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.is_breached(password).await
        }
    }

    struct Slow;

    #[async_trait]
    impl BreachLookup for Slow {
        async fn is_breached(&self, _password: &str) -> Result<bool, LookupError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    struct Failing;

    #[async_trait]
    impl BreachLookup for Failing {
        async fn is_breached(&self, _password: &str) -> Result<bool, LookupError> {
            Err(LookupError::Unavailable("503".into()))
        }
    }

    #[tokio::test]
    async fn only_opted_in_accounts_are_reported() {
        let corpus = StaticBreachCorpus::from_passwords(["hunter2"]);
        let status =
            check_breaches(&corpus, &accounts(), Duration::from_secs(1), never_cancelled()).await;

        assert!(status.is_leaked("a"));
        assert!(status.is_leaked("b"));
        assert!(!status.is_leaked("c"));
        assert!(!status.is_leaked("d"));
    }

    #[tokio::test]
    async fn each_distinct_password_is_queried_once() {
        let lookup = Counting {
            inner: StaticBreachCorpus::from_passwords(["hunter2"]),
            calls: AtomicUsize::new(0),
        };
        check_breaches(&lookup, &accounts(), Duration::from_secs(1), never_cancelled()).await;
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_unknown() {
        let status = check_breaches(&Slow, &accounts(), Duration::from_secs(5), never_cancelled()).await;
        assert_eq!(status, LeakStatus::Unknown);
        assert!(!status.is_leaked("a"));
    }

    #[tokio::test]
    async fn lookup_error_yields_unknown() {
        let status =
            check_breaches(&Failing, &accounts(), Duration::from_secs(1), never_cancelled()).await;
        assert_eq!(status, LeakStatus::Unknown);
    }

    #[tokio::test]
    async fn cancellation_yields_unknown() {
        let corpus = StaticBreachCorpus::from_passwords(["hunter2"]);
        let status = check_breaches(&corpus, &accounts(), Duration::from_secs(1), async {}).await;
        assert_eq!(status, LeakStatus::Unknown);
    }

    #[tokio::test]
    async fn no_candidates_means_checked_and_empty() {
        let mut db = Database::new();
        db.insert(Item::new("x").with_field(fields::PASSWORD, "hunter2"));
        let status =
            check_breaches(&Failing, &db.accounts(), Duration::from_secs(1), never_cancelled())
                .await;
        assert_eq!(status, LeakStatus::Checked(BTreeSet::new()));
    }
}
