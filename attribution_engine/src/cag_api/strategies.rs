//! The tier ladder.
//!
//! Each match stage is a pure selection function over a pre-fetched [`CandidateSet`]: no store access, no side
//! effects, fully deterministic. The engine evaluates the stages in strict precedence and performs the claim
//! separately, which keeps every stage unit-testable in isolation and lets new stages slot in without touching
//! the existing ones.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::{
    db_types::{ClickEvent, ClickId, ConfidenceTier, NewPurchase, PurchaseId},
    helpers::{email_digest, phone_digest},
    traits::TimeRange,
};

/// The match stages, in evaluation order. First success wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    ExactId,
    Identity,
    Probabilistic,
}

impl MatchStage {
    pub const ALL: [MatchStage; 3] = [MatchStage::ExactId, MatchStage::Identity, MatchStage::Probabilistic];

    pub fn tier(&self) -> ConfidenceTier {
        match self {
            MatchStage::ExactId => ConfidenceTier::ExactId,
            MatchStage::Identity => ConfidenceTier::Identity,
            MatchStage::Probabilistic => ConfidenceTier::Probabilistic,
        }
    }
}

/// The signals one purchase brings to matching, normalized once up front.
#[derive(Debug, Clone)]
pub struct PurchaseSignals {
    pub purchase_id: PurchaseId,
    pub gclid: Option<String>,
    pub email_hash: Option<String>,
    pub phone_hash: Option<String>,
    pub ip: Option<String>,
    pub purchased_at: DateTime<Utc>,
    pub identity_window: TimeRange,
    pub ip_window: TimeRange,
}

impl PurchaseSignals {
    pub fn from_purchase(
        purchase: &NewPurchase,
        identity_window: chrono::Duration,
        ip_window: chrono::Duration,
    ) -> Self {
        Self {
            purchase_id: purchase.purchase_id.clone(),
            gclid: purchase.gclid.clone().filter(|g| !g.trim().is_empty()),
            email_hash: purchase.email.as_deref().and_then(email_digest),
            phone_hash: purchase.phone.as_deref().and_then(phone_digest),
            ip: purchase.ip.clone().filter(|ip| !ip.trim().is_empty()),
            purchased_at: purchase.purchased_at,
            identity_window: TimeRange::ending_at(purchase.purchased_at, identity_window),
            ip_window: TimeRange::ending_at(purchase.purchased_at, ip_window),
        }
    }

    pub fn identity_hashes(&self) -> Vec<String> {
        self.email_hash.iter().chain(self.phone_hash.iter()).cloned().collect()
    }

    pub fn has_identity(&self) -> bool {
        self.email_hash.is_some() || self.phone_hash.is_some()
    }
}

/// The candidate clicks fetched for a batch, indexed for the stages.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    /// Clicks carrying a platform click id, keyed by that id.
    pub by_gclid: HashMap<String, ClickEvent>,
    /// Clicks sharing a contact identity hash with some purchase of the batch.
    pub identity: Vec<ClickEvent>,
    /// Clicks sharing an originating IP with some purchase of the batch.
    pub ip: Vec<ClickEvent>,
}

impl CandidateSet {
    pub fn new(gclid_clicks: Vec<ClickEvent>, identity: Vec<ClickEvent>, ip: Vec<ClickEvent>) -> Self {
        let by_gclid =
            gclid_clicks.into_iter().filter_map(|c| c.gclid.clone().map(|g| (g, c))).collect::<HashMap<_, _>>();
        Self { by_gclid, identity, ip }
    }
}

/// Runs one stage of the ladder for one purchase. Returns the selected candidate, or `None` if the stage does not
/// apply or no candidate qualifies.
pub fn select<'a>(
    stage: MatchStage,
    signals: &PurchaseSignals,
    candidates: &'a CandidateSet,
    excluded: &HashSet<ClickId>,
) -> Option<&'a ClickEvent> {
    match stage {
        MatchStage::ExactId => exact_id(signals, candidates, excluded),
        MatchStage::Identity => identity(signals, candidates, excluded),
        MatchStage::Probabilistic => probabilistic(signals, candidates, excluded),
    }
}

/// Stage 1: the purchase carried the platform click id itself. No window applies; the click id is trusted
/// outright, even when the purchase also carries conflicting identity signals.
fn exact_id<'a>(
    signals: &PurchaseSignals,
    candidates: &'a CandidateSet,
    excluded: &HashSet<ClickId>,
) -> Option<&'a ClickEvent> {
    let gclid = signals.gclid.as_deref()?;
    candidates.by_gclid.get(gclid).filter(|c| claimable(c, signals, excluded))
}

/// Stage 2: last-touch over clicks sharing a contact identity digest, within the identity window.
fn identity<'a>(
    signals: &PurchaseSignals,
    candidates: &'a CandidateSet,
    excluded: &HashSet<ClickId>,
) -> Option<&'a ClickEvent> {
    if !signals.has_identity() {
        return None;
    }
    last_touch(candidates.identity.iter().filter(|c| {
        claimable(c, signals, excluded)
            && signals.identity_window.contains(c.created_at)
            && shares_identity(c, signals)
    }))
}

/// Stage 3: last-touch over clicks from the purchase's IP, within the (much tighter) IP window. Only runs when
/// the purchase carries no identity signal at all.
fn probabilistic<'a>(
    signals: &PurchaseSignals,
    candidates: &'a CandidateSet,
    excluded: &HashSet<ClickId>,
) -> Option<&'a ClickEvent> {
    if signals.has_identity() {
        return None;
    }
    let ip = signals.ip.as_deref()?;
    last_touch(
        candidates
            .ip
            .iter()
            .filter(|c| claimable(c, signals, excluded) && signals.ip_window.contains(c.created_at) && c.ip == ip),
    )
}

fn shares_identity(click: &ClickEvent, signals: &PurchaseSignals) -> bool {
    let email_matches = match (&click.email_hash, &signals.email_hash) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    let phone_matches = match (&click.phone_hash, &signals.phone_hash) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    email_matches || phone_matches
}

/// A candidate is claimable if it is unclaimed, or already claimed by this very purchase (re-match), and has not
/// been excluded by an earlier claim conflict in this run.
fn claimable(click: &ClickEvent, signals: &PurchaseSignals, excluded: &HashSet<ClickId>) -> bool {
    if excluded.contains(&click.id) {
        return false;
    }
    match &click.matched_purchase_id {
        None => true,
        Some(owner) => *owner == signals.purchase_id,
    }
}

/// Most recent click wins; equal timestamps break toward the smaller click id, so selection is deterministic.
fn last_touch<'a, I: Iterator<Item = &'a ClickEvent>>(clicks: I) -> Option<&'a ClickEvent> {
    clicks.max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id)))
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db_types::NewPurchase;

    fn click(id: &str, ip: &str, age_hours: i64) -> ClickEvent {
        ClickEvent {
            id: ClickId::from(id),
            gclid: None,
            email_hash: None,
            phone_hash: None,
            ip: ip.to_string(),
            created_at: Utc::now() - Duration::hours(age_hours),
            processed: false,
            matched_purchase_id: None,
        }
    }

    fn signals(purchase: &NewPurchase) -> PurchaseSignals {
        PurchaseSignals::from_purchase(purchase, Duration::days(30), Duration::hours(24))
    }

    #[test]
    fn exact_id_hits_the_click_with_that_gclid() {
        let mut c = click("c1", "10.0.0.1", 5);
        c.gclid = Some("G-123".to_string());
        let candidates = CandidateSet::new(vec![c], vec![], vec![]);
        let purchase = NewPurchase::new("p1", Utc::now()).with_gclid("G-123");
        let hit = select(MatchStage::ExactId, &signals(&purchase), &candidates, &HashSet::new());
        assert_eq!(hit.unwrap().id, ClickId::from("c1"));
    }

    #[test]
    fn exact_id_skips_clicks_claimed_by_another_purchase() {
        let mut c = click("c1", "10.0.0.1", 5);
        c.gclid = Some("G-123".to_string());
        c.matched_purchase_id = Some("other".into());
        let candidates = CandidateSet::new(vec![c], vec![], vec![]);
        let purchase = NewPurchase::new("p1", Utc::now()).with_gclid("G-123");
        assert!(select(MatchStage::ExactId, &signals(&purchase), &candidates, &HashSet::new()).is_none());
    }

    #[test]
    fn identity_prefers_the_most_recent_candidate() {
        let purchase = NewPurchase::new("p1", Utc::now()).with_email("a@x.com");
        let sig = signals(&purchase);
        let hash = sig.email_hash.clone().unwrap();
        let mut older = click("c1", "10.0.0.1", 48);
        older.email_hash = Some(hash.clone());
        let mut newer = click("c2", "10.0.0.2", 2);
        newer.email_hash = Some(hash);
        let candidates = CandidateSet::new(vec![], vec![older, newer], vec![]);
        let hit = select(MatchStage::Identity, &sig, &candidates, &HashSet::new());
        assert_eq!(hit.unwrap().id, ClickId::from("c2"));
    }

    #[test]
    fn identity_ties_break_toward_the_smaller_click_id() {
        let purchase = NewPurchase::new("p1", Utc::now()).with_email("a@x.com");
        let sig = signals(&purchase);
        let hash = sig.email_hash.clone().unwrap();
        let ts = Utc::now() - Duration::hours(3);
        let mut a = click("c-b", "10.0.0.1", 0);
        a.created_at = ts;
        a.email_hash = Some(hash.clone());
        let mut b = click("c-a", "10.0.0.2", 0);
        b.created_at = ts;
        b.email_hash = Some(hash);
        let candidates = CandidateSet::new(vec![], vec![a, b], vec![]);
        let hit = select(MatchStage::Identity, &sig, &candidates, &HashSet::new());
        assert_eq!(hit.unwrap().id, ClickId::from("c-a"));
    }

    #[test]
    fn identity_rejects_clicks_outside_the_window() {
        let purchase = NewPurchase::new("p1", Utc::now()).with_email("a@x.com");
        let sig = signals(&purchase);
        let hash = sig.email_hash.clone().unwrap();
        let mut stale = click("c1", "10.0.0.1", 31 * 24);
        stale.email_hash = Some(hash.clone());
        let mut future = click("c2", "10.0.0.1", 2);
        future.created_at = Utc::now() + Duration::hours(1);
        future.email_hash = Some(hash);
        let candidates = CandidateSet::new(vec![], vec![stale, future], vec![]);
        assert!(select(MatchStage::Identity, &sig, &candidates, &HashSet::new()).is_none());
    }

    #[test]
    fn probabilistic_only_runs_without_identity() {
        let with_identity = NewPurchase::new("p1", Utc::now()).with_email("a@x.com").with_ip("10.0.0.1");
        let candidates = CandidateSet::new(vec![], vec![], vec![click("c1", "10.0.0.1", 2)]);
        assert!(select(MatchStage::Probabilistic, &signals(&with_identity), &candidates, &HashSet::new()).is_none());

        let anonymous = NewPurchase::new("p2", Utc::now()).with_ip("10.0.0.1");
        let hit = select(MatchStage::Probabilistic, &signals(&anonymous), &candidates, &HashSet::new());
        assert_eq!(hit.unwrap().id, ClickId::from("c1"));
    }

    #[test]
    fn probabilistic_rejects_clicks_beyond_the_ip_window() {
        let anonymous = NewPurchase::new("p1", Utc::now()).with_ip("10.0.0.1");
        let candidates = CandidateSet::new(vec![], vec![], vec![click("c1", "10.0.0.1", 26)]);
        assert!(select(MatchStage::Probabilistic, &signals(&anonymous), &candidates, &HashSet::new()).is_none());
    }

    #[test]
    fn excluded_candidates_are_never_selected() {
        let anonymous = NewPurchase::new("p1", Utc::now()).with_ip("10.0.0.1");
        let candidates = CandidateSet::new(vec![], vec![], vec![click("c1", "10.0.0.1", 2)]);
        let excluded = HashSet::from([ClickId::from("c1")]);
        assert!(select(MatchStage::Probabilistic, &signals(&anonymous), &candidates, &excluded).is_none());
    }

    #[test]
    fn re_match_may_reselect_its_own_click() {
        let mut c = click("c1", "10.0.0.1", 2);
        c.gclid = Some("G-9".to_string());
        c.matched_purchase_id = Some("p1".into());
        let candidates = CandidateSet::new(vec![c], vec![], vec![]);
        let purchase = NewPurchase::new("p1", Utc::now()).with_gclid("G-9");
        let hit = select(MatchStage::ExactId, &signals(&purchase), &candidates, &HashSet::new());
        assert_eq!(hit.unwrap().id, ClickId::from("c1"));
    }
}
