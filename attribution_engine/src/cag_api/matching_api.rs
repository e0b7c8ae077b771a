use std::collections::HashSet;

use chrono::{Duration, Utc};
use futures_util::try_join;
use log::*;

use crate::{
    cag_api::{
        errors::EngineError,
        strategies::{self, CandidateSet, MatchStage, PurchaseSignals},
    },
    db_types::{ClickId, MatchResult, NewPurchase, PurchaseRecord},
    helpers::ShutdownFlag,
    traits::{CommitOutcome, MatchStore, TimeRange},
};

const DEFAULT_IDENTITY_WINDOW_DAYS: i64 = 30;
const DEFAULT_IP_WINDOW_HOURS: i64 = 24;
const DEFAULT_CLAIM_RETRIES: u32 = 3;

/// Tunables for the matching engine. The defaults are the ones the attribution windows were designed around;
/// deployments override them through the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct MatchingConfig {
    /// How far back an identity match may reach, ending at the purchase timestamp.
    pub identity_window: Duration,
    /// How far back an IP-only match may reach. Much tighter, since IPs are shared and recycled.
    pub ip_window: Duration,
    /// How many claim conflicts to absorb per stage before falling through to the next one.
    pub claim_retries: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            identity_window: Duration::days(DEFAULT_IDENTITY_WINDOW_DAYS),
            ip_window: Duration::hours(DEFAULT_IP_WINDOW_HOURS),
            claim_retries: DEFAULT_CLAIM_RETRIES,
        }
    }
}

/// `MatchingApi` is the primary API for attributing purchase records to captured click events.
///
/// Purchases are stored idempotently on entry, then driven through the tier ladder (exact id, identity,
/// probabilistic). Candidate selection is pure and in-memory; the claim is a conditional store write, so several
/// process instances can run the matcher concurrently without ever double-attributing a click.
pub struct MatchingApi<B> {
    db: B,
    config: MatchingConfig,
    shutdown: ShutdownFlag,
}

impl<B: std::fmt::Debug> std::fmt::Debug for MatchingApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MatchingApi ({:?})", self.db)
    }
}

impl<B> MatchingApi<B> {
    pub fn new(db: B, config: MatchingConfig) -> Self {
        Self { db, config, shutdown: ShutdownFlag::new() }
    }

    /// Installs a shared shutdown flag. Bulk matching checks it between purchases and reports the untouched
    /// remainder from stored state.
    pub fn with_shutdown_flag(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }
}

impl<B> MatchingApi<B>
where B: MatchStore
{
    /// Attribute a single purchase. The purchase is stored (idempotently) first, so re-submitting the same
    /// purchase later — for instance once an identity has been captured — re-evaluates it under the upgrade-only
    /// rule.
    pub async fn match_purchase(&self, purchase: NewPurchase) -> Result<MatchResult, EngineError> {
        let mut results = self.bulk_match(vec![purchase]).await?;
        // bulk_match returns exactly one result per input purchase
        Ok(results.remove(0))
    }

    /// Attribute many purchases in one call. Returns one result per input purchase, in input order.
    ///
    /// Candidate lookups are batched across the whole input set — one round trip per lookup kind (click id,
    /// identity, IP) — instead of one per purchase. Claims still happen per purchase, in input order, with
    /// purchases earlier in the batch winning contested candidates.
    pub async fn bulk_match(&self, purchases: Vec<NewPurchase>) -> Result<Vec<MatchResult>, EngineError> {
        for purchase in &purchases {
            if purchase.purchase_id.as_str().trim().is_empty() {
                return Err(EngineError::InvalidInput("purchase id must not be empty".to_string()));
            }
        }
        if purchases.is_empty() {
            return Ok(Vec::new());
        }
        debug!("🔎️ Matching batch of {} purchase(s)", purchases.len());

        let mut records = Vec::with_capacity(purchases.len());
        for purchase in &purchases {
            let (record, created) = self.db.upsert_purchase(purchase.clone()).await?;
            if created {
                trace!("🔎️ Purchase [{}] stored with id {}", record.purchase_id, record.id);
            }
            records.push(record);
        }

        let signals: Vec<PurchaseSignals> = purchases
            .iter()
            .map(|p| PurchaseSignals::from_purchase(p, self.config.identity_window, self.config.ip_window))
            .collect();
        let candidates = self.fetch_candidates(&signals).await?;

        let mut excluded = HashSet::new();
        let mut results = Vec::with_capacity(purchases.len());
        for (signal, record) in signals.iter().zip(records.into_iter()) {
            if self.shutdown.is_triggered() {
                debug!("🔎️ Shutdown requested; reporting purchase [{}] from stored state", record.purchase_id);
                results.push(record.stored_match());
                continue;
            }
            let result = self.match_one(signal, &record, &candidates, &mut excluded).await?;
            results.push(result);
        }
        Ok(results)
    }

    /// Runs the ladder for one purchase and commits the outcome, honouring the upgrade-only rule.
    async fn match_one(
        &self,
        signals: &PurchaseSignals,
        record: &PurchaseRecord,
        candidates: &CandidateSet,
        excluded: &mut HashSet<ClickId>,
    ) -> Result<MatchResult, EngineError> {
        for stage in MatchStage::ALL {
            // A stored result at or above this tier can never be improved by this stage or any below it.
            if record.confidence >= stage.tier() {
                trace!(
                    "🔎️ Purchase [{}] already matched at {}; keeping the stored result",
                    record.purchase_id,
                    record.confidence
                );
                return Ok(record.stored_match());
            }
            if let Some(result) = self.try_stage(stage, signals, record, candidates, excluded).await? {
                return Ok(result);
            }
        }
        if record.confidence > crate::db_types::ConfidenceTier::None {
            return Ok(record.stored_match());
        }
        let result = MatchResult::none(record.purchase_id.clone(), Utc::now());
        match self.db.commit_match(&result, None).await? {
            CommitOutcome::Committed(_) => {},
            // Committing a no-match never claims anything, so a conflict here cannot happen; keep the stored
            // state if a backend misbehaves.
            CommitOutcome::Conflict => warn!("🔎️ Unexpected conflict committing NONE for [{}]", record.purchase_id),
        }
        debug!("🔎️ Purchase [{}] is unmatchable at this time", record.purchase_id);
        Ok(result)
    }

    /// Runs one stage with its claim-retry loop: select, claim, and on conflict exclude the contested click and
    /// re-select, up to the configured bound, before giving up on the stage.
    async fn try_stage(
        &self,
        stage: MatchStage,
        signals: &PurchaseSignals,
        record: &PurchaseRecord,
        candidates: &CandidateSet,
        excluded: &mut HashSet<ClickId>,
    ) -> Result<Option<MatchResult>, EngineError> {
        for attempt in 0..=self.config.claim_retries {
            let Some(click) = strategies::select(stage, signals, candidates, excluded) else {
                return Ok(None);
            };
            let result =
                MatchResult::new(record.purchase_id.clone(), click.id.clone(), stage.tier(), Utc::now());
            let superseded = record.matched_click_id.as_ref().filter(|prior| **prior != click.id);
            match self.db.commit_match(&result, superseded).await? {
                CommitOutcome::Committed(_) => {
                    excluded.insert(click.id.clone());
                    debug!(
                        "🔎️ Purchase [{}] matched to click [{}] at {} (attempt {attempt})",
                        record.purchase_id,
                        click.id,
                        stage.tier()
                    );
                    return Ok(Some(result));
                },
                CommitOutcome::Conflict => {
                    debug!(
                        "🔎️ Click [{}] was claimed concurrently; retrying {} for purchase [{}]",
                        click.id,
                        stage.tier(),
                        record.purchase_id
                    );
                    excluded.insert(click.id.clone());
                },
            }
        }
        Ok(None)
    }

    /// Fetches candidates for the whole batch: one round trip per lookup kind, windows widened to cover every
    /// purchase in the batch (per-purchase windows are re-applied in the pure selection functions).
    async fn fetch_candidates(&self, signals: &[PurchaseSignals]) -> Result<CandidateSet, EngineError> {
        let gclids: Vec<String> =
            dedupe(signals.iter().filter_map(|s| s.gclid.clone()));
        let hashes: Vec<String> = dedupe(signals.iter().flat_map(|s| s.identity_hashes()));
        // Only purchases without any identity signal are eligible for the probabilistic stage.
        let ips: Vec<String> = dedupe(signals.iter().filter(|s| !s.has_identity()).filter_map(|s| s.ip.clone()));

        let identity_window = signals.iter().map(|s| s.identity_window).reduce(|a, b| a.union(&b));
        let ip_window = signals
            .iter()
            .filter(|s| !s.has_identity())
            .map(|s| s.ip_window)
            .reduce(|a, b| a.union(&b));

        let (by_gclid, identity, ip) = try_join!(
            self.fetch_gclid_clicks(&gclids),
            self.fetch_identity_clicks(&hashes, identity_window),
            self.fetch_ip_clicks(&ips, ip_window),
        )?;
        trace!(
            "🔎️ Candidate fetch complete: {} by click id, {} by identity, {} by ip",
            by_gclid.len(),
            identity.len(),
            ip.len()
        );
        Ok(CandidateSet::new(by_gclid, identity, ip))
    }

    async fn fetch_gclid_clicks(&self, gclids: &[String]) -> Result<Vec<crate::db_types::ClickEvent>, EngineError> {
        if gclids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.db.fetch_clicks_by_gclid(gclids).await?)
    }

    async fn fetch_identity_clicks(
        &self,
        hashes: &[String],
        window: Option<TimeRange>,
    ) -> Result<Vec<crate::db_types::ClickEvent>, EngineError> {
        match window {
            Some(window) if !hashes.is_empty() => {
                Ok(self.db.candidate_clicks_for_identity(hashes, window).await?)
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn fetch_ip_clicks(
        &self,
        ips: &[String],
        window: Option<TimeRange>,
    ) -> Result<Vec<crate::db_types::ClickEvent>, EngineError> {
        match window {
            Some(window) if !ips.is_empty() => Ok(self.db.candidate_clicks_for_ips(ips, window).await?),
            _ => Ok(Vec::new()),
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

fn dedupe<I: IntoIterator<Item = String>>(values: I) -> Vec<String> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}
