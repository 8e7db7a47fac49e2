use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use tokio::sync::broadcast;

use seyield_orchestrator::balance::BalanceCache;
use seyield_orchestrator::chain::sim::{CallRecord, SimChain};
use seyield_orchestrator::chain::{ChainReads, WriteCall};
use seyield_orchestrator::config::{Config, ConfigError};
use seyield_orchestrator::orchestrator::{
    BackoffPolicy, EventDetail, FailureReason, OperationEvent, OperationHandle, OperationId,
    OperationKind, OperationRequest, OperationState, Orchestrator, Revert,
};
use seyield_orchestrator::Error;

const ALICE: Address = Address::repeat_byte(0xa1);
const SHOP: Address = Address::repeat_byte(0x4d);
const SELLER: Address = Address::repeat_byte(0x5e);

struct Harness {
    chain: Arc<SimChain>,
    cache: Arc<BalanceCache>,
    orchestrator: Orchestrator,
    config: Config,
    events: broadcast::Receiver<OperationEvent>,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.orchestrator.settle_schedule_ms = vec![0, 50, 100];
        config.orchestrator.approval_grace = BackoffPolicy {
            initial_delay_ms: 5,
            factor: 2,
            max_delay_ms: 20,
            max_attempts: 3,
        };
        Self::with_config(config)
    }

    fn with_config(config: Config) -> Self {
        let chain = Arc::new(
            SimChain::from_config(&config).with_demo_catalog(SHOP),
        );
        let cache = Arc::new(BalanceCache::new(chain.clone()));
        let orchestrator = Orchestrator::new(chain.clone(), cache.clone(), &config).unwrap();
        let events = orchestrator.subscribe();
        Self {
            chain,
            cache,
            orchestrator,
            config,
            events,
        }
    }

    fn usdc(&self) -> Address {
        self.config.assets.deposit.address
    }

    fn principal(&self) -> Address {
        self.config.assets.principal.address
    }

    fn reward(&self) -> Address {
        self.config.assets.reward.address
    }

    fn deposit(&self, amount: &str) -> OperationRequest {
        OperationRequest::deposit(ALICE, self.usdc(), amount)
    }

    fn drain(&mut self) -> Vec<OperationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn units(whole: u64) -> U256 {
    U256::from(whole) * U256::from(1_000_000u64)
}

fn transitions(events: &[OperationEvent], id: OperationId) -> Vec<OperationState> {
    events
        .iter()
        .filter(|event| event.operation_id == id)
        .filter_map(|event| match event.detail {
            EventDetail::Transition { to, .. } => Some(to),
            EventDetail::StillWaiting { .. } => None,
        })
        .collect()
}

async fn reach(handle: &OperationHandle, state: OperationState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.state() != state {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn deposit_round_trip_mints_principal_and_reward() {
    let mut h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(100));

    let handle = h.orchestrator.start(h.deposit("100")).unwrap();
    let operation = handle.wait().await;

    assert_eq!(operation.state, OperationState::Done);
    assert!(operation.last_error.is_none());
    assert_eq!(h.chain.balance(h.principal(), ALICE), units(100));
    assert_eq!(h.chain.balance(h.reward(), ALICE), units(5));
    assert_eq!(h.chain.balance(h.usdc(), ALICE), U256::ZERO);
    assert_eq!(h.cache.get(ALICE, h.principal()), Some(units(100)));
    assert_eq!(h.cache.get(ALICE, h.reward()), Some(units(5)));

    assert_eq!(
        transitions(&h.drain(), handle.id()),
        vec![
            OperationState::Validating,
            OperationState::ApprovalPending,
            OperationState::ApprovalConfirmed,
            OperationState::ActionPending,
            OperationState::ActionConfirmed,
            OperationState::Settling,
            OperationState::Done,
        ]
    );
    let methods: Vec<_> = operation.transactions.iter().map(|tx| tx.method).collect();
    assert_eq!(methods, vec!["approve", "deposit"]);
    assert!(operation.transactions.iter().all(|tx| tx.receipt.is_some()));
}

#[tokio::test]
async fn sufficient_allowance_skips_approval() {
    let mut h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(50));
    h.chain
        .set_allowance(h.usdc(), ALICE, h.config.contracts.vault, units(50));

    let handle = h.orchestrator.start(h.deposit("50")).unwrap();
    let operation = handle.wait().await;

    assert_eq!(operation.state, OperationState::Done);
    assert_eq!(h.chain.submitted_methods(), vec!["deposit"]);
    assert!(
        !transitions(&h.drain(), handle.id()).contains(&OperationState::ApprovalPending)
    );
}

#[tokio::test]
async fn action_is_submitted_only_after_approval_receipt() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;
    assert_eq!(operation.state, OperationState::Done);

    let approval = operation.transactions[0].handle;
    let calls = h.chain.calls();
    let approval_receipt = calls
        .iter()
        .position(|call| *call == CallRecord::Receipt(approval))
        .unwrap();
    let deposit_submit = calls
        .iter()
        .position(|call| {
            matches!(call, CallRecord::Submit { call: WriteCall::Deposit { .. }, .. })
        })
        .unwrap();
    assert!(approval_receipt < deposit_submit);
}

#[tokio::test]
async fn invalid_amounts_never_reach_the_chain() {
    let h = Harness::new();

    for amount in ["0", "-5", "ten", "1.0000001"] {
        let operation = h.orchestrator.start(h.deposit(amount)).unwrap().wait().await;

        assert_eq!(operation.state, OperationState::Failed, "amount {amount}");
        assert!(matches!(
            operation.last_error.map(|failure| failure.reason),
            Some(FailureReason::InvalidInput)
        ));
    }
    assert!(h.chain.calls().is_empty());
}

#[tokio::test]
async fn short_balance_fails_validation() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));

    let operation = h.orchestrator.start(h.deposit("50")).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Failed);
    let failure = operation.last_error.unwrap();
    assert_eq!(failure.reason, FailureReason::InvalidInput);
    assert!(failure.message.contains("10 available"));
    assert!(h.chain.submitted_methods().is_empty());
}

#[tokio::test]
async fn unsupported_asset_fails_validation() {
    let h = Harness::new();

    let request = OperationRequest::deposit(ALICE, h.reward(), "1");
    let operation = h.orchestrator.start(request).unwrap().wait().await;

    assert_eq!(
        operation.last_error.map(|failure| failure.reason),
        Some(FailureReason::InvalidInput)
    );
    assert!(h.chain.calls().is_empty());
}

#[tokio::test]
async fn insufficient_yield_revert_is_classified() {
    let h = Harness::new();
    h.chain.mint(h.reward(), ALICE, units(10));
    h.chain
        .revert_next("purchaseItem", "execution reverted: InsufficientYield()");

    let operation = h
        .orchestrator
        .start(OperationRequest::purchase(ALICE, 1))
        .unwrap()
        .wait()
        .await;

    assert_eq!(operation.state, OperationState::Failed);
    let failure = operation.last_error.unwrap();
    assert_eq!(
        failure.reason,
        FailureReason::ActionRejected(Revert::InsufficientBalance)
    );
    assert_eq!(
        failure.raw.as_deref(),
        Some("execution reverted: InsufficientYield()")
    );
    assert_eq!(h.chain.balance(h.reward(), ALICE), units(10));
}

#[tokio::test]
async fn purchase_burns_reward_and_pays_merchant() {
    let h = Harness::new();
    h.chain.mint(h.reward(), ALICE, units(7));

    let operation = h
        .orchestrator
        .start(OperationRequest::purchase(ALICE, 1))
        .unwrap()
        .wait()
        .await;

    assert_eq!(operation.state, OperationState::Done);
    assert_eq!(h.chain.balance(h.reward(), ALICE), units(2));
    assert_eq!(h.cache.get(ALICE, h.reward()), Some(units(2)));
    assert_eq!(
        h.chain.balance(h.usdc(), SHOP),
        units(5)
    );
    assert_eq!(h.chain.read_count("isEligibleForPurchase"), 1);
}

#[tokio::test]
async fn inactive_or_missing_items_fail_validation() {
    let h = Harness::new();
    h.chain.mint(h.reward(), ALICE, units(100));

    for item in [3, 42] {
        let operation = h
            .orchestrator
            .start(OperationRequest::purchase(ALICE, item))
            .unwrap()
            .wait()
            .await;

        assert_eq!(
            operation.last_error.map(|failure| failure.reason),
            Some(FailureReason::InvalidInput),
            "item {item}"
        );
    }
    assert!(h.chain.submitted_methods().is_empty());
}

#[tokio::test]
async fn second_start_of_same_kind_is_rejected() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(20));
    h.chain.hold_receipts("approve");

    let first = h.orchestrator.start(h.deposit("10")).unwrap();
    reach(&first, OperationState::ApprovalPending).await;

    let second = h.orchestrator.start(h.deposit("10"));

    assert!(matches!(
        second,
        Err(Error::ConcurrentOperation { account, .. }) if account == ALICE
    ));
    assert_eq!(first.state(), OperationState::ApprovalPending);
    assert_eq!(h.chain.submitted_methods(), vec!["approve"]);

    let claim = h.orchestrator.start(OperationRequest::claim(ALICE));
    assert!(claim.is_ok());
}

#[tokio::test]
async fn lock_is_released_on_terminal_state() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(20));

    let first = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;
    assert_eq!(first.state, OperationState::Done);

    let second = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;
    assert_eq!(second.state, OperationState::Done);
    assert_eq!(h.chain.submitted_methods(), vec!["approve", "deposit", "deposit"]);
}

#[tokio::test(start_paused = true)]
async fn pending_approval_receipt_waits_indefinitely() {
    let mut h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain.hold_receipts("approve");

    let handle = h.orchestrator.start(h.deposit("10")).unwrap();
    reach(&handle, OperationState::ApprovalPending).await;
    let before = handle.elapsed_in_state();

    tokio::time::sleep(Duration::from_secs(50)).await;

    assert_eq!(handle.state(), OperationState::ApprovalPending);
    assert!(handle.elapsed_in_state() >= before + Duration::from_secs(50));
    assert!(matches!(
        handle.cancel(),
        Err(Error::NotCancellable {
            state: OperationState::ApprovalPending,
            ..
        })
    ));

    let waiting: Vec<_> = h
        .drain()
        .into_iter()
        .filter_map(|event| match event.detail {
            EventDetail::StillWaiting { state, elapsed } => Some((state, elapsed)),
            EventDetail::Transition { .. } => None,
        })
        .collect();
    assert_eq!(waiting.len(), 3);
    assert!(waiting.iter().all(|(state, _)| *state == OperationState::ApprovalPending));
    assert!(waiting.windows(2).all(|pair| pair[0].1 < pair[1].1));
    assert_eq!(h.chain.submitted_methods(), vec!["approve"]);
}

#[tokio::test]
async fn every_operation_emits_exactly_one_terminal_event() {
    let mut h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(100));
    h.chain.reject_next("deposit", "User rejected the request.");

    let mut ids = Vec::new();
    for request in [
        h.deposit("0"),
        h.deposit("10"),
        h.deposit("10"),
        OperationRequest::claim(ALICE),
        OperationRequest::claim(ALICE),
    ] {
        let handle = h.orchestrator.start(request).unwrap();
        ids.push(handle.id());
        handle.wait().await;
    }
    let cancelled = h.orchestrator.start(h.deposit("1")).unwrap();
    cancelled.cancel().unwrap();
    assert_eq!(cancelled.wait().await.state, OperationState::Cancelled);
    ids.push(cancelled.id());

    let events = h.drain();
    for id in ids {
        let terminal = events
            .iter()
            .filter(|event| event.operation_id == id && event.is_terminal())
            .count();
        assert_eq!(terminal, 1, "{id}");
    }
}

#[tokio::test]
async fn cancel_before_submission_discards_operation() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));

    let handle = h.orchestrator.start(h.deposit("10")).unwrap();
    handle.cancel().unwrap();
    let operation = handle.wait().await;

    assert_eq!(operation.state, OperationState::Cancelled);
    assert!(operation.transactions.is_empty());
    assert!(h.chain.submitted_methods().is_empty());
    assert!(!h.orchestrator.is_in_flight(ALICE, operation.kind()));
}

#[tokio::test]
async fn done_even_when_refreshes_fail() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain
        .set_allowance(h.usdc(), ALICE, h.config.contracts.vault, U256::MAX);
    h.chain.fail_reads("balanceOf");

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Done);
    assert_eq!(h.chain.balance(h.principal(), ALICE), units(10));
    assert_eq!(h.cache.get(ALICE, h.principal()), None);
    // validation read, then the first settling refresh of three assets
    assert!(h.chain.read_count("balanceOf") >= 4);
}

#[tokio::test]
async fn later_settling_refreshes_only_touch_the_cache() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));

    let handle = h.orchestrator.start(h.deposit("10")).unwrap();
    handle.wait().await;
    assert_eq!(h.cache.get(ALICE, h.reward()), Some(units(1) / U256::from(2u8)));

    h.chain.mint(h.reward(), ALICE, units(3));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(handle.state(), OperationState::Done);
    assert_eq!(
        h.cache.get(ALICE, h.reward()),
        Some(units(3) + units(1) / U256::from(2u8))
    );
}

#[tokio::test]
async fn lagging_allowance_is_rechecked_before_action() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    // One read during validation, two during the grace period.
    h.chain.stale_allowance_reads(3);

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Done);
    assert_eq!(h.chain.read_count("allowance"), 4);
}

#[tokio::test]
async fn allowance_revert_is_reported_distinctly() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain
        .set_allowance(h.usdc(), ALICE, h.config.contracts.vault, U256::MAX);
    h.chain
        .revert_next("deposit", "execution reverted: ERC20InsufficientAllowance()");

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;

    assert_eq!(
        operation.last_error.map(|failure| failure.reason),
        Some(FailureReason::ActionRejected(Revert::InsufficientAllowance))
    );
}

#[tokio::test]
async fn declined_approval_stops_before_action() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain.reject_next("approve", "User rejected the request.");

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;

    assert_eq!(
        operation.last_error.map(|failure| failure.reason),
        Some(FailureReason::ApprovalRejected)
    );
    assert_eq!(h.chain.submitted_methods(), vec!["approve"]);
}

#[tokio::test]
async fn exact_approval_when_unlimited_is_disabled() {
    let mut config = Config::default();
    config.orchestrator.unlimited_approval = false;
    config.orchestrator.settle_schedule_ms = vec![0];
    let h = Harness::with_config(config);
    h.chain.mint(h.usdc(), ALICE, units(25));

    let operation = h.orchestrator.start(h.deposit("25")).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Done);
    let approved = h.chain.calls().into_iter().find_map(|call| match call {
        CallRecord::Submit {
            call: WriteCall::Approve { amount, .. },
            ..
        } => Some(amount),
        _ => None,
    });
    assert_eq!(approved, Some(units(25)));
}

#[tokio::test]
async fn withdraw_returns_deposit() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(100));
    h.orchestrator.start(h.deposit("100")).unwrap().wait().await;

    let request = OperationRequest::withdraw(ALICE, h.principal(), "40");
    let operation = h.orchestrator.start(request).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Done);
    assert_eq!(h.chain.balance(h.usdc(), ALICE), units(40));
    assert_eq!(h.cache.get(ALICE, h.principal()), Some(units(60)));
}

#[tokio::test]
async fn faucet_claim_once_per_cooldown() {
    let h = Harness::new();

    let first = h
        .orchestrator
        .start(OperationRequest::claim(ALICE))
        .unwrap()
        .wait()
        .await;
    let second = h
        .orchestrator
        .start(OperationRequest::claim(ALICE))
        .unwrap()
        .wait()
        .await;

    assert_eq!(first.state, OperationState::Done);
    assert_eq!(h.cache.get(ALICE, h.usdc()), Some(units(1_000)));
    assert_eq!(
        second.last_error.map(|failure| failure.reason),
        Some(FailureReason::InvalidInput)
    );
    assert_eq!(h.chain.submitted_methods(), vec!["claimTokens"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn free_lock_implies_terminal_state() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(100));
    h.chain
        .set_allowance(h.usdc(), ALICE, h.config.contracts.vault, U256::MAX);

    for round in 0..20 {
        let handle = h.orchestrator.start(h.deposit("1")).unwrap();
        loop {
            let free = !h.orchestrator.is_in_flight(ALICE, OperationKind::Deposit);
            let state = handle.state();
            if free {
                assert!(state.is_terminal(), "round {round}: lock free while {state}");
            }
            if state.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.wait().await.state, OperationState::Done);
    }
    assert_eq!(h.chain.balance(h.principal(), ALICE), units(20));
}

#[tokio::test]
async fn zero_soft_timeout_is_rejected_at_construction() {
    let mut config = Config::default();
    config.orchestrator.soft_timeout_ms = 0;
    let chain = Arc::new(SimChain::from_config(&config));
    let cache = Arc::new(BalanceCache::new(chain.clone()));

    let result = Orchestrator::new(chain, cache, &config);

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn reverted_approval_stops_before_action() {
    let mut h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain
        .revert_next("approve", "execution reverted: ApprovalBlocked()");

    let handle = h.orchestrator.start(h.deposit("10")).unwrap();
    let operation = handle.wait().await;

    assert_eq!(operation.state, OperationState::Failed);
    let failure = operation.last_error.unwrap();
    assert!(matches!(failure.reason, FailureReason::ApprovalRejected));
    assert_eq!(
        failure.raw.as_deref(),
        Some("execution reverted: ApprovalBlocked()")
    );
    assert_eq!(h.chain.submitted_methods(), vec!["approve"]);
    assert_eq!(h.chain.balance(h.usdc(), ALICE), units(10));
    assert_eq!(
        transitions(&h.drain(), handle.id()),
        vec![
            OperationState::Validating,
            OperationState::ApprovalPending,
            OperationState::Failed,
        ]
    );
}

#[tokio::test]
async fn approval_receipt_lookup_failure_is_a_chain_error() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain.fail_receipts("approve");

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Failed);
    let failure = operation.last_error.unwrap();
    assert!(matches!(failure.reason, FailureReason::ChainError));
    assert!(
        failure
            .raw
            .as_deref()
            .is_some_and(|raw| raw.contains("eth_getTransactionReceipt"))
    );
    assert_eq!(h.chain.submitted_methods(), vec!["approve"]);
    assert_eq!(h.chain.balance(h.principal(), ALICE), U256::ZERO);
}

#[tokio::test]
async fn action_receipt_lookup_failure_is_a_chain_error() {
    let mut h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain
        .set_allowance(h.usdc(), ALICE, h.config.contracts.vault, U256::MAX);
    h.chain.fail_receipts("deposit");

    let handle = h.orchestrator.start(h.deposit("10")).unwrap();
    let operation = handle.wait().await;

    let failure = operation.last_error.unwrap();
    assert!(matches!(failure.reason, FailureReason::ChainError));
    assert!(
        failure
            .raw
            .as_deref()
            .is_some_and(|raw| raw.contains("deposit"))
    );
    assert_eq!(h.chain.submitted_methods(), vec!["deposit"]);
    assert!(operation.transactions[0].receipt.is_none());
    assert!(
        !transitions(&h.drain(), handle.id()).contains(&OperationState::ActionConfirmed)
    );
}

#[tokio::test]
async fn allowance_is_read_after_the_last_grace_delay() {
    let h = Harness::new();
    h.chain.mint(h.usdc(), ALICE, units(10));
    h.chain.stale_allowance_reads(100);

    let operation = h.orchestrator.start(h.deposit("10")).unwrap().wait().await;

    assert_eq!(operation.state, OperationState::Done);
    // Validation, then one read before and one after each of three delays.
    assert_eq!(h.chain.read_count("allowance"), 5);
    assert_eq!(h.chain.submitted_methods(), vec!["approve", "deposit"]);
}

#[tokio::test]
async fn merchant_registers_lists_and_updates_an_item() {
    let mut h = Harness::new();
    let merchant = h.config.contracts.merchant;

    let register = OperationRequest::register_merchant(SELLER, "  Tote Shop ", "Canvas bags");
    let handle = h.orchestrator.start(register).unwrap();
    assert_eq!(handle.wait().await.state, OperationState::Done);
    assert_eq!(
        transitions(&h.drain(), handle.id()),
        vec![
            OperationState::Validating,
            OperationState::ActionPending,
            OperationState::ActionConfirmed,
            OperationState::Settling,
            OperationState::Done,
        ]
    );
    let info = h.chain.merchant_info(merchant, SELLER).await.unwrap();
    assert!(info.is_registered);
    assert_eq!(info.name, "Tote Shop");

    let listing = OperationRequest::list_item(SELLER, "Tote bag", "Large", "12.5", "3");
    let listed = h.orchestrator.start(listing).unwrap().wait().await;
    assert_eq!(listed.state, OperationState::Done);
    let item = h.chain.item_info(merchant, 4).await.unwrap();
    assert_eq!(item.merchant, SELLER);
    assert_eq!(item.price, U256::from(12_500_000u64));
    assert_eq!(item.required_yield, units(3));

    let update = OperationRequest::update_item(SELLER, 4, "10", "2", false);
    let updated = h.orchestrator.start(update).unwrap().wait().await;
    assert_eq!(updated.state, OperationState::Done);
    let item = h.chain.item_info(merchant, 4).await.unwrap();
    assert!(!item.is_active);
    assert_eq!(item.required_yield, units(2));

    let rename = OperationRequest::update_merchant(SELLER, "Totes & Co", "");
    let renamed = h.orchestrator.start(rename).unwrap().wait().await;
    assert_eq!(renamed.state, OperationState::Done);
    assert_eq!(
        h.chain.merchant_info(merchant, SELLER).await.unwrap().name,
        "Totes & Co"
    );
    assert_eq!(
        h.chain.submitted_methods(),
        vec!["registerMerchant", "listItem", "updateItem", "updateMerchant"]
    );
}

#[tokio::test]
async fn merchant_requests_are_validated_before_submission() {
    let h = Harness::new();
    h.chain.register_merchant(SELLER, "Rival", "");

    let cases = [
        (
            OperationRequest::list_item(ALICE, "Mug", "", "4", "1"),
            "You need to be registered as a merchant to list items.",
        ),
        (
            OperationRequest::update_merchant(ALICE, "Alice", ""),
            "You need to be registered as a merchant to update your information.",
        ),
        (
            OperationRequest::register_merchant(ALICE, "   ", ""),
            "Name required. Please enter a name for your merchant account.",
        ),
        (
            OperationRequest::register_merchant(SHOP, "Kopi", ""),
            "This address is already registered as a merchant.",
        ),
        (
            OperationRequest::update_item(SELLER, 1, "1", "1", false),
            "You can only update items you listed.",
        ),
        (
            OperationRequest::update_item(SHOP, 99, "1", "1", true),
            "Item 99 does not exist.",
        ),
    ];
    for (request, expected) in cases {
        let operation = h.orchestrator.start(request).unwrap().wait().await;
        let failure = operation.last_error.unwrap();
        assert!(matches!(failure.reason, FailureReason::InvalidInput), "{expected}");
        assert_eq!(failure.message, expected);
    }

    let free = h
        .orchestrator
        .start(OperationRequest::list_item(SHOP, "Scone", "", "0", "1"))
        .unwrap()
        .wait()
        .await;
    assert!(matches!(
        free.last_error.map(|failure| failure.reason),
        Some(FailureReason::InvalidInput)
    ));
    assert!(h.chain.submitted_methods().is_empty());
    assert!(h.chain.item_info(h.config.contracts.merchant, 1).await.unwrap().is_active);
}

#[tokio::test]
async fn merchant_revert_is_classified() {
    let h = Harness::new();
    h.chain
        .revert_next("listItem", "execution reverted: NotRegisteredMerchant()");

    let operation = h
        .orchestrator
        .start(OperationRequest::list_item(SHOP, "Scone", "", "2", "1"))
        .unwrap()
        .wait()
        .await;

    let failure = operation.last_error.unwrap();
    assert!(matches!(
        failure.reason,
        FailureReason::ActionRejected(Revert::NotMerchant)
    ));
    assert_eq!(
        failure.raw.as_deref(),
        Some("execution reverted: NotRegisteredMerchant()")
    );
    assert_eq!(h.chain.item_count(h.config.contracts.merchant).await.unwrap(), 3);
}
