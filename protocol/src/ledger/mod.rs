//! # Balance & Reputation Ledger
//!
//! The ledger owns every account record. It is the only component that
//! mutates balances or reputation, and the only holder of the badge
//! minting capability.
//!
//! ```text
//! mod.rs        : Ledger, LedgerBuilder, AdminCapability, operations
//! state.rs      : LedgerState, the account table and snapshot format
//! guard.rs      : ReentrancyGuard
//! reputation.rs : Tier, TierPerks, reward curves
//! events.rs     : LedgerEvent, ActivityLog
//! ```
//!
//! ## Ordering
//!
//! Every mutating operation follows the same shape:
//!
//! 1. Validate arguments.
//! 2. Enter the reentrancy guard.
//! 3. Apply the change to [`LedgerState`] and release the state lock.
//! 4. Call out to the yield venue, if the operation needs it.
//! 5. On failure, restore the record captured in step 3.
//! 6. Apply reputation, reconcile the badge, publish events.
//!
//! The state lock is never held across steps 4 or 6, so a venue or badge
//! issuer that calls back into the ledger hits the guard instead of
//! deadlocking.

mod events;
mod guard;
mod reputation;
mod state;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::account::{Account, AccountId};
use crate::badge::{BadgeId, BadgeIssuer, MinterCapability};
use crate::config::{ConfigError, LedgerConfig, EVENT_CHANNEL_CAPACITY};
use crate::error::LedgerError;
use crate::yield_venue::YieldVenue;
use crate::zkp::{FieldWord, Groth16Proof, ProofVerifier};

pub use events::{LedgerEvent, LedgerEventKind};
pub use reputation::{cashback_percent, spend_bonus, Tier, TierPerks};
pub use state::LedgerState;

use events::ActivityLog;
use guard::ReentrancyGuard;

// ---------------------------------------------------------------------------
// AdminCapability
// ---------------------------------------------------------------------------

/// Authorizes privileged operations on exactly one [`Ledger`].
///
/// Returned once, by [`LedgerBuilder::build`]. Not `Clone`: whoever owns it
/// is the ledger's administrator.
#[derive(Debug)]
pub struct AdminCapability {
    ledger_id: Uuid,
}

impl AdminCapability {
    /// The ledger this capability was issued for.
    pub fn ledger_id(&self) -> Uuid {
        self.ledger_id
    }
}

// ---------------------------------------------------------------------------
// LedgerBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`Ledger`] from its collaborators.
pub struct LedgerBuilder {
    config: LedgerConfig,
    venue: Arc<dyn YieldVenue>,
    badges: Arc<dyn BadgeIssuer>,
    verifier: Option<Arc<dyn ProofVerifier>>,
    state: LedgerState,
}

impl LedgerBuilder {
    pub fn new(venue: Arc<dyn YieldVenue>, badges: Arc<dyn BadgeIssuer>) -> Self {
        Self {
            config: LedgerConfig::default(),
            venue,
            badges,
            verifier: None,
            state: LedgerState::new(),
        }
    }

    pub fn config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    /// Without a verifier every proof is reported invalid.
    pub fn verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Starts from a previously taken [`Ledger::snapshot`].
    pub fn restore(mut self, state: LedgerState) -> Self {
        self.state = state;
        self
    }

    pub fn build(self) -> Result<(Ledger, AdminCapability), ConfigError> {
        self.config.validate()?;

        let id = Uuid::new_v4();
        let mut activity = ActivityLog::new(self.config.activity_history);
        activity.resume_from(self.state.last_event_seq());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let ledger = Ledger {
            id,
            config: self.config,
            state: Mutex::new(self.state),
            activity: Mutex::new(activity),
            events,
            guard: ReentrancyGuard::new(),
            venue: self.venue,
            badges: self.badges,
            minter: MinterCapability::new(),
            verifier: self.verifier,
        };
        Ok((ledger, AdminCapability { ledger_id: id }))
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Custodial balances, reputation and badge bookkeeping.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct Ledger {
    id: Uuid,
    config: LedgerConfig,
    state: Mutex<LedgerState>,
    activity: Mutex<ActivityLog>,
    events: broadcast::Sender<LedgerEvent>,
    guard: ReentrancyGuard,
    venue: Arc<dyn YieldVenue>,
    badges: Arc<dyn BadgeIssuer>,
    minter: MinterCapability,
    verifier: Option<Arc<dyn ProofVerifier>>,
}

/// Events produced by one operation, published after it commits.
type Pending = Vec<(AccountId, LedgerEventKind)>;

impl Ledger {
    pub fn builder(venue: Arc<dyn YieldVenue>, badges: Arc<dyn BadgeIssuer>) -> LedgerBuilder {
        LedgerBuilder::new(venue, badges)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Credits `amount` to `account` and places it in the yield venue.
    pub fn deposit(&self, account: &AccountId, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let _entered = self.guard.enter()?;

        let previous = {
            let mut state = self.state.lock();
            let previous = state.get(account).cloned();
            let mut next = previous.clone().unwrap_or_default();
            next.deposited_balance = credit(next.deposited_balance, amount)?;
            next.yield_principal = credit(next.yield_principal, amount)?;
            state.insert(account.clone(), next);
            previous
        };

        if let Err(err) = self.venue.supply(account, amount) {
            let mut state = self.state.lock();
            match previous {
                Some(record) => state.insert(account.clone(), record),
                None => state.remove(account),
            };
            warn!(%account, amount, error = %err, "deposit rolled back");
            return Err(err.into());
        }

        let mut pending: Pending = vec![(account.clone(), LedgerEventKind::Deposited { amount })];
        let (old, new) = self.add_reputation(account, self.config.reputation_per_deposit);
        if new != old {
            pending.push((account.clone(), LedgerEventKind::ReputationChanged { old, new }));
        }
        self.reconcile_badge(account, old, new, false, &mut pending);
        self.publish(pending);

        debug!(%account, amount, reputation = new, "deposit");
        Ok(())
    }

    /// Returns `amount` of deposited funds to `account` from the venue.
    pub fn withdraw(&self, account: &AccountId, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let _entered = self.guard.enter()?;

        self.reserve(account, amount, true)?;

        if let Err(err) = self.venue.withdraw(account, amount) {
            self.release(account, amount, true);
            warn!(%account, amount, error = %err, "withdrawal reinstated");
            return Err(err.into());
        }

        self.publish(vec![(account.clone(), LedgerEventKind::Withdrawn { amount })]);
        debug!(%account, amount, "withdraw");
        Ok(())
    }

    /// Debits `amount` for a card purchase and rewards the account.
    ///
    /// The funds stay in the venue; settlement with the merchant happens
    /// off-ledger.
    pub fn spend(&self, account: &AccountId, amount: u64, purpose: &str) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let _entered = self.guard.enter()?;

        let score_before = self.reserve(account, amount, false)?;
        let bonus = spend_bonus(score_before, &self.config);

        let mut pending: Pending = vec![(
            account.clone(),
            LedgerEventKind::Spent {
                amount,
                purpose: purpose.to_string(),
            },
        )];
        let (old, new) = self.add_reputation(account, bonus);
        if new != old {
            pending.push((account.clone(), LedgerEventKind::ReputationChanged { old, new }));
        }
        self.reconcile_badge(account, old, new, false, &mut pending);
        self.publish(pending);

        debug!(%account, amount, purpose, bonus, "spend");
        Ok(())
    }

    /// Sets `account`'s reputation to `new_score`.
    ///
    /// The only way a score can decrease. Leaves an existing badge alone;
    /// mints one if the account is at or above the badge tier without one.
    pub fn update_reputation_score(
        &self,
        cap: &AdminCapability,
        account: &AccountId,
        new_score: u64,
    ) -> Result<(), LedgerError> {
        self.authorize(cap)?;
        let _entered = self.guard.enter()?;

        let old = {
            let mut state = self.state.lock();
            let record = state.entry(account);
            std::mem::replace(&mut record.reputation_score, new_score)
        };

        let mut pending = Pending::new();
        if old != new_score {
            pending.push((
                account.clone(),
                LedgerEventKind::ReputationChanged {
                    old,
                    new: new_score,
                },
            ));
        }
        self.reconcile_badge(account, old, new_score, true, &mut pending);
        self.publish(pending);

        debug!(%account, old, new = new_score, "reputation override");
        Ok(())
    }

    /// Burns `account`'s badge. `None` if it held none.
    pub fn revoke_badge(
        &self,
        cap: &AdminCapability,
        account: &AccountId,
    ) -> Result<Option<BadgeId>, LedgerError> {
        self.authorize(cap)?;
        let _entered = self.guard.enter()?;

        let Some(badge_id) = self.state.lock().get(account).and_then(|a| a.badge_token_id) else {
            return Ok(None);
        };

        self.badges.burn(&self.minter, account, badge_id)?;
        if let Some(record) = self.state.lock().get_mut(account) {
            record.badge_token_id = None;
        }
        self.publish(vec![(account.clone(), LedgerEventKind::BadgeBurned { badge_id })]);

        debug!(%account, %badge_id, "badge revoked");
        Ok(Some(badge_id))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn deposited_usdc(&self, account: &AccountId) -> u64 {
        self.state
            .lock()
            .get(account)
            .map_or(0, |a| a.deposited_balance)
    }

    pub fn reputation_score(&self, account: &AccountId) -> u64 {
        self.state
            .lock()
            .get(account)
            .map_or(0, |a| a.reputation_score)
    }

    /// The account's record, or the zero record if unseen.
    pub fn account(&self, account: &AccountId) -> Account {
        self.state.lock().account(account)
    }

    pub fn tier(&self, account: &AccountId) -> Tier {
        Tier::for_score(self.reputation_score(account), &self.config.tiers)
    }

    pub fn perks(&self, account: &AccountId) -> TierPerks {
        TierPerks::for_score(self.reputation_score(account), &self.config)
    }

    pub fn account_count(&self) -> usize {
        self.state.lock().len()
    }

    /// Yield the venue reports for `account`. Informational only.
    pub fn accrued_yield(&self, account: &AccountId) -> Result<u64, LedgerError> {
        let _entered = self.guard.enter()?;
        Ok(self.venue.accrued_yield(account)?)
    }

    /// Yield the venue reports across all accounts.
    pub fn total_yield_earned(&self) -> Result<u64, LedgerError> {
        let _entered = self.guard.enter()?;
        Ok(self.venue.total_yield()?)
    }

    /// Most recent events, newest first. `None` means every account.
    pub fn recent_activity(&self, account: Option<&AccountId>, limit: usize) -> Vec<LedgerEvent> {
        self.activity.lock().recent(account, limit)
    }

    /// Live feed of committed events.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Sum of every deposited balance. Takes only the state lock.
    pub fn total_deposited(&self) -> u128 {
        self.state.lock().total_deposited()
    }

    /// A consistent copy of every account record.
    pub fn snapshot(&self) -> LedgerState {
        let _entered = self.guard.enter();
        self.copy_state()
    }

    /// Copies the state and runs `with` while no operation is in flight.
    ///
    /// Collaborator snapshots taken inside `with` agree with the returned
    /// state: no deposit, withdrawal or spend can commit in between.
    pub fn snapshot_with<T>(
        &self,
        with: impl FnOnce(&LedgerState) -> T,
    ) -> Result<(LedgerState, T), LedgerError> {
        let _entered = self.guard.enter()?;
        let state = self.copy_state();
        let extra = with(&state);
        Ok((state, extra))
    }

    fn copy_state(&self) -> LedgerState {
        let mut snapshot = self.state.lock().clone();
        snapshot.set_last_event_seq(self.activity.lock().last_seq());
        snapshot
    }

    /// Checks a Groth16 proof in the Solidity word layout.
    ///
    /// Never fails: a missing verifier, a malformed proof and a wrong proof
    /// all read as `false`.
    pub fn verify_zk_snark_proof(
        &self,
        a: [FieldWord; 2],
        b: [[FieldWord; 2]; 2],
        c: [FieldWord; 2],
        public_inputs: &[FieldWord],
    ) -> bool {
        let Some(verifier) = self.verifier.as_ref() else {
            debug!("no proof verifier configured");
            return false;
        };
        let _entered = match self.guard.enter() {
            Ok(entered) => entered,
            Err(err) => {
                warn!(error = %err, "proof verification rejected");
                return false;
            }
        };

        let proof = Groth16Proof { a, b, c };
        match verifier.verify(&proof, public_inputs) {
            Ok(valid) => {
                debug!(valid, inputs = public_inputs.len(), "proof checked");
                valid
            }
            Err(err) => {
                warn!(error = %err, "proof could not be verified");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn authorize(&self, cap: &AdminCapability) -> Result<(), LedgerError> {
        if cap.ledger_id != self.id {
            warn!(ledger = %self.id, presented = %cap.ledger_id, "foreign admin capability");
            return Err(LedgerError::Unauthorized);
        }
        Ok(())
    }

    /// Debits the deposited balance (and the principal if `from_venue`).
    /// Returns the score at the time of the debit. Unseen accounts are not
    /// created.
    fn reserve(&self, account: &AccountId, amount: u64, from_venue: bool) -> Result<u64, LedgerError> {
        let mut state = self.state.lock();
        let available = state.get(account).map_or(0, |a| a.deposited_balance);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        // amount > 0, so the record exists.
        let record = state.entry(account);
        record.deposited_balance -= amount;
        if from_venue {
            record.yield_principal -= amount;
        }
        Ok(record.reputation_score)
    }

    /// Undoes a [`Self::reserve`].
    fn release(&self, account: &AccountId, amount: u64, from_venue: bool) {
        let mut state = self.state.lock();
        let record = state.entry(account);
        record.deposited_balance = record.deposited_balance.saturating_add(amount);
        if from_venue {
            record.yield_principal = record.yield_principal.saturating_add(amount);
        }
    }

    fn add_reputation(&self, account: &AccountId, delta: u64) -> (u64, u64) {
        let mut state = self.state.lock();
        let record = state.entry(account);
        let old = record.reputation_score;
        record.reputation_score = old.saturating_add(delta);
        (old, record.reputation_score)
    }

    /// Mints the account's badge when its score crosses the badge tier.
    ///
    /// With `override_` set, being at or above the tier is enough.
    /// A failed mint is logged; the operation that triggered it has already
    /// committed and stands.
    fn reconcile_badge(
        &self,
        account: &AccountId,
        old: u64,
        new: u64,
        override_: bool,
        pending: &mut Pending,
    ) {
        let threshold = self.config.tiers.silver;
        let crossed = old < threshold && new >= threshold;
        if !(crossed || (override_ && new >= threshold)) {
            return;
        }
        if self.state.lock().get(account).and_then(|a| a.badge_token_id).is_some() {
            return;
        }

        let tier = Tier::for_score(new, &self.config.tiers);
        match self.badges.mint(&self.minter, account, tier) {
            Ok(badge_id) => {
                self.state.lock().entry(account).badge_token_id = Some(badge_id);
                pending.push((account.clone(), LedgerEventKind::BadgeMinted { badge_id, tier }));
                debug!(%account, %badge_id, %tier, "badge minted");
            }
            Err(err) => warn!(%account, error = %err, "badge mint failed"),
        }
    }

    fn publish(&self, pending: Pending) {
        if pending.is_empty() {
            return;
        }
        let mut activity = self.activity.lock();
        for (account, kind) in pending {
            let event = activity.record(&account, kind);
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }
}

fn credit(current: u64, amount: u64) -> Result<u64, LedgerError> {
    current.checked_add(amount).ok_or(LedgerError::Overflow {
        current,
        credit: amount,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::BadgeError;
    use crate::yield_venue::VenueError;
    use crate::zkp::AcceptAllVerifier;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct TestVenue {
        fail: AtomicBool,
        supplied: AtomicU64,
    }

    impl YieldVenue for TestVenue {
        fn supply(&self, _account: &AccountId, amount: u64) -> Result<(), VenueError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(VenueError::Paused);
            }
            self.supplied.fetch_add(amount, Ordering::SeqCst);
            Ok(())
        }

        fn withdraw(&self, _account: &AccountId, amount: u64) -> Result<(), VenueError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(VenueError::Failed("liquidity crunch".into()));
            }
            self.supplied.fetch_sub(amount, Ordering::SeqCst);
            Ok(())
        }

        fn accrued_yield(&self, _account: &AccountId) -> Result<u64, VenueError> {
            Ok(7)
        }

        fn total_yield(&self) -> Result<u64, VenueError> {
            Ok(42)
        }
    }

    #[derive(Default)]
    struct TestBadges {
        next: AtomicU64,
        owners: parking_lot::Mutex<HashMap<AccountId, BadgeId>>,
    }

    impl BadgeIssuer for TestBadges {
        fn mint(
            &self,
            _cap: &MinterCapability,
            account: &AccountId,
            _tier: Tier,
        ) -> Result<BadgeId, BadgeError> {
            let mut owners = self.owners.lock();
            if let Some(id) = owners.get(account) {
                return Ok(*id);
            }
            let id = BadgeId::new(self.next.fetch_add(1, Ordering::SeqCst) + 1);
            owners.insert(account.clone(), id);
            Ok(id)
        }

        fn burn(
            &self,
            _cap: &MinterCapability,
            account: &AccountId,
            badge_id: BadgeId,
        ) -> Result<(), BadgeError> {
            let mut owners = self.owners.lock();
            match owners.get(account) {
                Some(id) if *id == badge_id => {
                    owners.remove(account);
                    Ok(())
                }
                _ => Err(BadgeError::NotOwner {
                    account: account.clone(),
                    badge_id,
                }),
            }
        }

        fn badge_of(&self, account: &AccountId) -> Option<BadgeId> {
            self.owners.lock().get(account).copied()
        }
    }

    fn alice() -> AccountId {
        AccountId::parse("0x00000000000000000000000000000000000a11ce").unwrap()
    }

    fn setup() -> (Ledger, AdminCapability, Arc<TestVenue>, Arc<TestBadges>) {
        let venue = Arc::new(TestVenue::default());
        let badges = Arc::new(TestBadges::default());
        let (ledger, admin) = Ledger::builder(venue.clone(), badges.clone())
            .build()
            .unwrap();
        (ledger, admin, venue, badges)
    }

    #[test]
    fn deposit_credits_balance_principal_and_reputation() {
        let (ledger, _, venue, _) = setup();
        ledger.deposit(&alice(), 1_000_000).unwrap();

        let account = ledger.account(&alice());
        assert_eq!(account.deposited_balance, 1_000_000);
        assert_eq!(account.yield_principal, 1_000_000);
        assert_eq!(account.reputation_score, 1);
        assert_eq!(venue.supplied.load(Ordering::SeqCst), 1_000_000);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let (ledger, _, _, _) = setup();
        assert_eq!(ledger.deposit(&alice(), 0), Err(LedgerError::InvalidAmount));
        assert_eq!(ledger.withdraw(&alice(), 0), Err(LedgerError::InvalidAmount));
        assert_eq!(ledger.spend(&alice(), 0, "x"), Err(LedgerError::InvalidAmount));
    }

    #[test]
    fn withdraw_from_unseen_account_does_not_create_it() {
        let (ledger, _, _, _) = setup();
        assert_eq!(
            ledger.withdraw(&alice(), u64::MAX),
            Err(LedgerError::InsufficientBalance {
                available: 0,
                requested: u64::MAX
            })
        );
        assert_eq!(ledger.account_count(), 0);
    }

    #[test]
    fn deposit_overflow_is_rejected_without_side_effects() {
        let (ledger, _, venue, _) = setup();
        ledger.deposit(&alice(), u64::MAX).unwrap();
        assert_eq!(
            ledger.deposit(&alice(), 1),
            Err(LedgerError::Overflow {
                current: u64::MAX,
                credit: 1
            })
        );
        assert_eq!(ledger.deposited_usdc(&alice()), u64::MAX);
        assert_eq!(ledger.reputation_score(&alice()), 1);
        assert_eq!(venue.supplied.load(Ordering::SeqCst), u64::MAX);
    }

    #[test]
    fn failed_supply_rolls_back_fresh_account() {
        let (ledger, _, venue, _) = setup();
        venue.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            ledger.deposit(&alice(), 500),
            Err(LedgerError::UpstreamFailure(_))
        ));
        assert_eq!(ledger.account_count(), 0);
        assert!(ledger.recent_activity(None, 10).is_empty());
    }

    #[test]
    fn failed_venue_withdraw_reinstates_reservation() {
        let (ledger, _, venue, _) = setup();
        ledger.deposit(&alice(), 500).unwrap();
        venue.fail.store(true, Ordering::SeqCst);
        assert!(ledger.withdraw(&alice(), 200).is_err());

        let account = ledger.account(&alice());
        assert_eq!(account.deposited_balance, 500);
        assert_eq!(account.yield_principal, 500);
    }

    #[test]
    fn spend_keeps_principal_and_awards_bonus_from_prior_score() {
        let (ledger, admin, _, _) = setup();
        ledger.deposit(&alice(), 1_000).unwrap();
        ledger.update_reputation_score(&admin, &alice(), 25).unwrap();

        ledger.spend(&alice(), 400, "groceries").unwrap();

        let account = ledger.account(&alice());
        assert_eq!(account.deposited_balance, 600);
        assert_eq!(account.yield_principal, 1_000);
        // 25 / 10 + 1 = 3
        assert_eq!(account.reputation_score, 28);
    }

    #[test]
    fn badge_minted_once_on_crossing() {
        let (ledger, admin, _, badges) = setup();
        for _ in 0..10 {
            ledger.deposit(&alice(), 1).unwrap();
        }
        let badge = ledger.account(&alice()).badge_token_id.expect("badge at silver");

        ledger.update_reputation_score(&admin, &alice(), 0).unwrap();
        for _ in 0..10 {
            ledger.deposit(&alice(), 1).unwrap();
        }

        assert_eq!(ledger.account(&alice()).badge_token_id, Some(badge));
        assert_eq!(badges.next.load(Ordering::SeqCst), 1);
        let minted = ledger
            .recent_activity(Some(&alice()), 100)
            .into_iter()
            .filter(|e| matches!(e.kind, LedgerEventKind::BadgeMinted { .. }))
            .count();
        assert_eq!(minted, 1);
    }

    #[test]
    fn revoked_badge_returns_only_after_recrossing() {
        let (ledger, admin, _, badges) = setup();
        ledger.update_reputation_score(&admin, &alice(), 10).unwrap();
        let first = ledger.account(&alice()).badge_token_id.unwrap();

        assert_eq!(ledger.revoke_badge(&admin, &alice()), Ok(Some(first)));
        assert_eq!(badges.badge_of(&alice()), None);

        ledger.deposit(&alice(), 1).unwrap();
        assert_eq!(ledger.account(&alice()).badge_token_id, None);

        ledger.update_reputation_score(&admin, &alice(), 5).unwrap();
        for _ in 0..5 {
            ledger.deposit(&alice(), 1).unwrap();
        }
        let second = ledger.account(&alice()).badge_token_id.unwrap();
        assert_ne!(first, second);
        assert_eq!(ledger.revoke_badge(&admin, &bob()), Ok(None));
    }

    fn bob() -> AccountId {
        AccountId::parse("0x0000000000000000000000000000000000000b0b").unwrap()
    }

    #[test]
    fn foreign_capability_is_unauthorized() {
        let (ledger, _, _, _) = setup();
        let (_, foreign) = setup_other();
        assert_eq!(
            ledger.update_reputation_score(&foreign, &alice(), 99),
            Err(LedgerError::Unauthorized)
        );
        assert_eq!(ledger.reputation_score(&alice()), 0);
    }

    fn setup_other() -> (Ledger, AdminCapability) {
        Ledger::builder(Arc::new(TestVenue::default()), Arc::new(TestBadges::default()))
            .build()
            .unwrap()
    }

    #[test]
    fn events_are_published_in_commit_order() {
        let (ledger, _, _, _) = setup();
        let mut rx = ledger.subscribe();
        ledger.deposit(&alice(), 10).unwrap();
        ledger.withdraw(&alice(), 4).unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEventKind::Deposited { amount: 10 },
                LedgerEventKind::ReputationChanged { old: 0, new: 1 },
                LedgerEventKind::Withdrawn { amount: 4 },
            ]
        );
    }

    #[test]
    fn snapshot_restores_balances_and_sequence() {
        let (ledger, _, _, _) = setup();
        ledger.deposit(&alice(), 300).unwrap();
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.last_event_seq(), 2);

        let (restored, _) = Ledger::builder(
            Arc::new(TestVenue::default()),
            Arc::new(TestBadges::default()),
        )
        .restore(snapshot)
        .build()
        .unwrap();
        assert_eq!(restored.deposited_usdc(&alice()), 300);

        let mut rx = restored.subscribe();
        restored.deposit(&alice(), 1).unwrap();
        assert_eq!(rx.try_recv().unwrap().seq, 3);
    }

    #[test]
    fn snapshot_with_holds_off_mutations() {
        let (ledger, _, _, _) = setup();
        ledger.deposit(&alice(), 300).unwrap();
        let (state, nested) = ledger
            .snapshot_with(|state| {
                assert_eq!(state.account(&alice()).deposited_balance, 300);
                ledger.deposit(&alice(), 1)
            })
            .unwrap();
        assert!(matches!(nested, Err(LedgerError::ReentrancyRejected)));
        assert_eq!(state.account(&alice()).deposited_balance, 300);
        assert_eq!(ledger.deposited_usdc(&alice()), 300);
    }

    #[test]
    fn summary_reads_do_not_wait_for_the_guard() {
        let (ledger, _, _, _) = setup();
        ledger.deposit(&alice(), 300).unwrap();
        ledger.deposit(&bob(), 200).unwrap();
        let (_, summary) = ledger
            .snapshot_with(|_| {
                std::thread::scope(|s| {
                    s.spawn(|| (ledger.account_count(), ledger.total_deposited()))
                        .join()
                        .unwrap()
                })
            })
            .unwrap();
        assert_eq!(summary, (2, 500));
    }

    #[test]
    fn proof_checks_fall_back_to_false_without_verifier() {
        let (ledger, _, _, _) = setup();
        let w = FieldWord::from_u64;
        assert!(!ledger.verify_zk_snark_proof(
            [w(1), w(2)],
            [[w(3), w(4)], [w(5), w(6)]],
            [w(7), w(8)],
            &[w(9), w(10)],
        ));

        let (stubbed, _) = Ledger::builder(
            Arc::new(TestVenue::default()),
            Arc::new(TestBadges::default()),
        )
        .verifier(Arc::new(AcceptAllVerifier))
        .build()
        .unwrap();
        assert!(stubbed.verify_zk_snark_proof(
            [w(1), w(2)],
            [[w(3), w(4)], [w(5), w(6)]],
            [w(7), w(8)],
            &[w(9), w(10)],
        ));
    }

    #[test]
    fn yield_reads_delegate_to_venue() {
        let (ledger, _, _, _) = setup();
        assert_eq!(ledger.accrued_yield(&alice()), Ok(7));
        assert_eq!(ledger.total_yield_earned(), Ok(42));
    }

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let mut config = LedgerConfig::default();
        config.cashback_divisor = 0;
        let built = Ledger::builder(
            Arc::new(TestVenue::default()),
            Arc::new(TestBadges::default()),
        )
        .config(config)
        .build();
        assert!(built.is_err());
    }
}
