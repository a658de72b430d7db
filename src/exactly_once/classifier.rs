//! Deciding which change events take effect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use crate::change::{ChangeEvent, DecoderRegistry, ModKind, Record, Source};
use crate::commons::storage::Key;
use crate::commons::error::Error;
use crate::models::{ExpenseAccount, Model, Team};
use super::resolver::Resolver;


//------------ SourcePolicy --------------------------------------------------

/// How repeated rows of a source are treated.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize
)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    /// A backfilled row only passes if the row has never been seen.
    #[default]
    ExactlyOnce,

    /// Backfilled rows always replace the snapshot and pass.
    ///
    /// Meant for reference tables whose rows are looked up rather than
    /// aggregated.
    AlwaysRefresh,
}

impl fmt::Display for SourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SourcePolicy::ExactlyOnce => "exactly_once",
            SourcePolicy::AlwaysRefresh => "always_refresh",
        })
    }
}


//------------ Admission -----------------------------------------------------

/// The snapshot update performed for an event that passed the classifier.
#[derive(Clone, Debug)]
pub struct Admission {
    key: Key,

    /// The snapshot written and the one it replaced.
    ///
    /// `None` if the snapshot was left as it was. A written snapshot of
    /// `None` means the snapshot was removed.
    written: Option<(Option<serde_json::Value>, Option<serde_json::Value>)>,
}

impl Admission {
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns whether the snapshot was changed.
    pub fn changed_snapshot(&self) -> bool {
        self.written.is_some()
    }
}


//------------ Classifier ----------------------------------------------------

/// Filters the change stream so that every row takes effect once.
///
/// Live inserts and updates always pass and carry the previous version of
/// their row, if there was one. Deletes pass only for rows that are known.
/// Backfilled rows pass only if the row has not been seen before, unless
/// their source is configured with [`SourcePolicy::AlwaysRefresh`].
///
/// Every event that passes has updated the row's snapshot before
/// `classify` returns.
#[derive(Debug)]
pub struct Classifier {
    resolver: Resolver,
    registry: Arc<DecoderRegistry>,
    policies: HashMap<Source, SourcePolicy>,
}

impl Classifier {
    /// Creates a classifier with the default policies.
    ///
    /// These refresh `public.teams` and `public.expense_accounts` and treat
    /// every other source as exactly once.
    pub fn new(resolver: Resolver, registry: Arc<DecoderRegistry>) -> Self {
        let mut policies = HashMap::new();
        policies.insert(Team::source(), SourcePolicy::AlwaysRefresh);
        policies.insert(ExpenseAccount::source(), SourcePolicy::AlwaysRefresh);
        Classifier { resolver, registry, policies }
    }

    pub fn set_policy(&mut self, source: Source, policy: SourcePolicy) {
        self.policies.insert(source, policy);
    }

    pub fn policy(&self, source: &Source) -> SourcePolicy {
        self.policies.get(source).copied().unwrap_or_default()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Classifies an event.
    ///
    /// Returns whether the event should be processed further. If so and
    /// the row was known before, its previous version is attached as
    /// `event.prior`.
    pub fn classify(&self, event: &mut ChangeEvent) -> Result<bool, Error> {
        self.admit(event).map(|admission| admission.is_some())
    }

    /// Classifies an event and returns how to undo its snapshot update.
    ///
    /// Returns `None` if the event was dropped. Otherwise the returned
    /// admission can be handed to [`revert`][Self::revert] if a consumer
    /// of the event fails.
    pub fn admit(
        &self, event: &mut ChangeEvent
    ) -> Result<Option<Admission>, Error> {
        let key = event.identity_key()?;
        let source = &event.source;
        let decode = |value: serde_json::Value| {
            self.registry.decode(source, value.clone()).map(|record| {
                (value, record)
            })
        };

        let (written, prior) = match (event.kind, self.policy(source)) {
            (ModKind::Insert | ModKind::Update, _)
            | (ModKind::Backfill, SourcePolicy::AlwaysRefresh) => {
                let value = self.snapshot(source, &event.data)?;
                let resolution = self.resolver.resolve_as(
                    &key, &value, decode
                )?;
                let written = if resolution.is_unchanged() {
                    None
                }
                else {
                    Some(Some(value))
                };
                (written, resolution.into_prior())
            }
            (ModKind::Backfill, SourcePolicy::ExactlyOnce) => {
                let value = self.snapshot(source, &event.data)?;
                if self.resolver.resolve_new(&key, &value)?.is_some() {
                    debug!("dropping backfill of known row {key}");
                    return Ok(None)
                }
                (Some(Some(value)), None)
            }
            (ModKind::Delete, _) => {
                match self.resolver.resolve_delete_as(&key, decode)? {
                    Some(prior) => (Some(None), Some(prior)),
                    None => {
                        debug!("dropping delete of unknown row {key}");
                        return Ok(None)
                    }
                }
            }
        };

        let (prior_value, prior) = prior.unzip();
        event.prior = prior;
        Ok(Some(Admission {
            key,
            written: written.map(|written| (written, prior_value)),
        }))
    }

    /// Undoes the snapshot update of an admitted event.
    ///
    /// The previous snapshot is only put back if the row's snapshot is
    /// still the one written by the event. Returns whether it was.
    pub fn revert(&self, admission: Admission) -> Result<bool, Error> {
        let Some((written, prior)) = admission.written else {
            return Ok(true)
        };
        let restored = self.resolver.restore(
            &admission.key, written.as_ref(), prior.as_ref()
        )?;
        if restored {
            debug!("restored snapshot of {}", admission.key);
        }
        else {
            warn!(
                "snapshot of {} changed before it could be restored",
                admission.key
            );
        }
        Ok(restored)
    }

    fn snapshot(
        &self, source: &Source, record: &Record
    ) -> Result<serde_json::Value, Error> {
        serde_json::to_value(record).map_err(|err| Error::decode(source, err))
    }
}


//============ Tests =========================================================
