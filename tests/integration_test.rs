//! Integration Tests - Round State Machine End to End
//!
//! Drives the execution and settlement phases against the in-memory
//! store with a mocked exchange. Uses mockall for trait mocking and
//! tokio::test for async tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use mockall::mock;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

use club_round_worker::adapters::persistence::InMemoryStore;
use club_round_worker::domain::ledger::LedgerEntryType;
use club_round_worker::domain::round::{
    ApiCredentials, MarketResolution, MemberIdentity, OrderFields, Round, RoundMember, RoundStatus, TradingProfile,
};
use club_round_worker::error::{ExchangeError, SettlementError};
use club_round_worker::ports::exchange::Exchange;
use club_round_worker::ports::repository::RoundRepository;
use club_round_worker::usecases::execution::RoundExecution;
use club_round_worker::usecases::settlement::RoundSettlement;
use club_round_worker::usecases::{ExecutionPhase, SettlementPhase};

// ---- Mock Definitions ----

mock! {
    pub Exch {}

    #[async_trait::async_trait]
    impl Exchange for Exch {
        async fn place_market_order(
            &self,
            member: &MemberIdentity,
            token_id: &str,
            amount: u64,
        ) -> anyhow::Result<OrderFields>;

        async fn get_order(&self, member: &MemberIdentity, order_id: &str) -> anyhow::Result<OrderFields>;

        async fn get_market_resolution(&self, condition_id: &str) -> anyhow::Result<MarketResolution>;
    }
}

// ---- Fixtures ----

fn round(id: &str, status: RoundStatus) -> Round {
    Round {
        id: id.to_string(),
        club_id: "club_1".to_string(),
        target_outcome: Some("Yes".to_string()),
        target_token_id: Some("token_yes".to_string()),
        condition_id: Some(format!("0x{}", "cd".repeat(32))),
        status,
        resolved_outcome: None,
        resolved_at: None,
        settled_at: None,
        stake_total: 0,
        created_at: Utc::now(),
    }
}

fn member(round_id: &str, user: &str, commit: u64, order_id: Option<&str>) -> RoundMember {
    RoundMember {
        id: format!("{round_id}:{user}"),
        round_id: round_id.to_string(),
        user_id: user.to_string(),
        commit_amount: commit,
        payout_amount: 0,
        pnl_amount: 0,
        settled_at: None,
        order: OrderFields {
            order_id: order_id.map(String::from),
            ..OrderFields::default()
        },
        trading: TradingProfile {
            wallet_active: true,
            safe_address: Some(format!("0xsafe_{user}")),
            signer_address: Some(format!("0xeoa_{user}")),
            signer_organization_id: Some("org_1".to_string()),
            credentials: Some(ApiCredentials {
                api_key: format!("key_{user}"),
                secret: "c2VjcmV0".to_string(),
                passphrase: "pass".to_string(),
            }),
            signature_type: 2,
        },
    }
}

fn filled(order_id: &str) -> OrderFields {
    OrderFields {
        order_id: Some(order_id.to_string()),
        status: Some("matched".to_string()),
        side: Some("BUY".to_string()),
        order_type: Some("FOK".to_string()),
        ..OrderFields::default()
    }
}

async fn store_with_round(members: Vec<RoundMember>, status: RoundStatus) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.put_round(round("R", status)).await;
    for m in members {
        store.put_member(m).await;
    }
    store
}

fn order_ids(members: &[RoundMember]) -> Vec<Option<String>> {
    members.iter().map(|m| m.order.order_id.clone()).collect()
}

// ---- Execution Phase ----

#[tokio::test]
async fn test_execution_places_only_missing_order_and_commits() {
    let store = store_with_round(
        vec![
            member("R", "u1", 100, Some("0xo1")),
            member("R", "u2", 200, Some("0xo2")),
            member("R", "u3", 50, None),
        ],
        RoundStatus::Pending,
    )
    .await;

    let mut exchange = MockExch::new();
    exchange
        .expect_place_market_order()
        .withf(|m, token, amount| m.user_id == "u3" && token == "token_yes" && *amount == 50)
        .times(1)
        .returning(|_, _, _| Ok(filled("0xo3")));

    let phase = ExecutionPhase::new(Arc::clone(&store), Arc::new(exchange), true);
    let (_tx, shutdown) = watch::channel(false);

    let report = phase.run_batch(25, &shutdown).await.unwrap();
    assert_eq!(report.rounds_committed, 1);
    assert_eq!(report.orders_placed, 1);
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Committed);

    let members = store.get_round_members(&"R".to_string()).await.unwrap();
    assert_eq!(
        order_ids(&members),
        vec![Some("0xo1".into()), Some("0xo2".into()), Some("0xo3".into())]
    );

    // Second pass: nothing due, no further placement (times(1) above).
    let again = phase.run_batch(25, &shutdown).await.unwrap();
    assert_eq!(again.rounds_seen, 0);
}

#[tokio::test]
async fn test_failed_placement_keeps_round_pending_then_retry_commits() {
    let store = store_with_round(
        vec![
            member("R", "u1", 100, Some("0xo1")),
            member("R", "u2", 200, Some("0xo2")),
            member("R", "u3", 50, None),
        ],
        RoundStatus::Pending,
    )
    .await;
    let (_tx, shutdown) = watch::channel(false);

    let mut rejecting = MockExch::new();
    rejecting
        .expect_place_market_order()
        .times(1)
        .returning(|_, _, _| Err(ExchangeError::OrderRejected("not enough balance".into()).into()));
    let first = ExecutionPhase::new(Arc::clone(&store), Arc::new(rejecting), true);

    let r = store.round("R").await.unwrap();
    assert_eq!(
        first.execute_round(&r).await.unwrap(),
        RoundExecution::Incomplete {
            orders_placed: 0,
            members_without_order: 1
        }
    );
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Pending);
    let members = store.get_round_members(&"R".to_string()).await.unwrap();
    assert!(members[2].order.order_id.is_none());

    let mut accepting = MockExch::new();
    accepting
        .expect_place_market_order()
        .withf(|m, _, _| m.user_id == "u3")
        .times(1)
        .returning(|_, _, _| Ok(filled("0xo3")));
    let retry = ExecutionPhase::new(Arc::clone(&store), Arc::new(accepting), true);

    let report = retry.run_batch(25, &shutdown).await.unwrap();
    assert_eq!(report.rounds_committed, 1);
    let members = store.get_round_members(&"R".to_string()).await.unwrap();
    assert_eq!(members[0].order.order_id.as_deref(), Some("0xo1"));
    assert_eq!(members[1].order.order_id.as_deref(), Some("0xo2"));
    assert_eq!(members[2].order.order_id.as_deref(), Some("0xo3"));
}

#[tokio::test]
async fn test_ineligible_member_blocks_whole_round() {
    let mut blocked = member("R", "u2", 200, None);
    blocked.trading.wallet_active = false;
    let store = store_with_round(vec![member("R", "u1", 100, None), blocked], RoundStatus::Pending).await;

    let mut exchange = MockExch::new();
    exchange.expect_place_market_order().times(0);
    let phase = ExecutionPhase::new(Arc::clone(&store), Arc::new(exchange), true);

    let r = store.round("R").await.unwrap();
    let RoundExecution::Ineligible { missing } = phase.execute_round(&r).await.unwrap() else {
        panic!("round should be ineligible");
    };
    assert_eq!(missing, vec![("u2".to_string(), vec!["active_wallet"])]);
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Pending);
}

// ---- Settlement Phase ----

fn resolved_yes() -> MarketResolution {
    MarketResolution {
        is_resolved: true,
        outcome: Some("Yes".to_string()),
        resolved_at: None,
    }
}

#[tokio::test]
async fn test_settlement_is_idempotent() {
    let mut winner = member("R", "u1", 100, Some("0xo1"));
    winner.order.taking_amount = Some(dec!(0.00015));
    winner.order.outcome = Some("Yes".to_string());
    let store = store_with_round(vec![winner], RoundStatus::Committed).await;

    let mut exchange = MockExch::new();
    exchange
        .expect_get_market_resolution()
        .times(2)
        .returning(|_| Ok(resolved_yes()));
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(exchange));

    let stale = store.round("R").await.unwrap();
    let RoundSettlement::Settled { outcome, effect } = phase.settle_round(&stale).await.unwrap() else {
        panic!("round should settle");
    };
    assert_eq!(outcome, "Yes");
    assert_eq!(effect.payouts_inserted, 1);
    assert!(effect.round_transitioned);

    let ledger = store.ledger().await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].entry_type, LedgerEntryType::Payout);
    assert_eq!(ledger[0].amount, 150);
    let members = store.get_round_members(&"R".to_string()).await.unwrap();
    assert_eq!(members[0].payout_amount, 150);
    assert_eq!(members[0].pnl_amount, 50);
    assert!(members[0].settled_at.is_some());
    let settled = store.round("R").await.unwrap();
    assert_eq!(settled.status, RoundStatus::Settled);
    assert_eq!(settled.resolved_outcome.as_deref(), Some("Yes"));

    // Re-run with the stale COMMITTED snapshot: no new facts written.
    let RoundSettlement::Settled { effect, .. } = phase.settle_round(&stale).await.unwrap() else {
        panic!("round should report settled");
    };
    assert!(effect.is_noop());
    assert_eq!(store.ledger().await.len(), 1);
}

#[tokio::test]
async fn test_losing_member_gets_no_payout_entry() {
    let mut loser = member("R", "u1", 200, Some("0xo1"));
    loser.order.size_matched = Some(dec!(0.0004));
    loser.order.outcome = Some("No".to_string());
    let store = store_with_round(vec![loser], RoundStatus::Committed).await;

    let mut exchange = MockExch::new();
    exchange.expect_get_market_resolution().returning(|_| Ok(resolved_yes()));
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(exchange));

    let r = store.round("R").await.unwrap();
    assert_ok!(phase.settle_round(&r).await);

    assert!(store.ledger().await.is_empty());
    let members = store.get_round_members(&"R".to_string()).await.unwrap();
    assert_eq!(members[0].payout_amount, 0);
    assert_eq!(members[0].pnl_amount, -200);
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Settled);
}

#[tokio::test]
async fn test_bad_round_does_not_block_batch() {
    let store = Arc::new(InMemoryStore::new());
    let mut older = round("old", RoundStatus::Committed);
    older.created_at = Utc::now() - chrono::Duration::hours(1);
    store.put_round(older).await;
    store.put_member(member("old", "u1", 100, Some("0xo1"))).await;

    store.put_round(round("new", RoundStatus::Committed)).await;
    let mut ok = member("new", "u2", 100, Some("0xo2"));
    ok.order.taking_amount = Some(dec!(0.0001));
    store.put_member(ok).await;

    let mut exchange = MockExch::new();
    exchange.expect_get_market_resolution().returning(|_| Ok(resolved_yes()));
    exchange
        .expect_get_order()
        .returning(|_, _| Err(anyhow::anyhow!("order lookup unavailable")));
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(exchange));
    let (_tx, shutdown) = watch::channel(false);

    let report = phase.sweep(25, &shutdown).await.unwrap();
    assert_eq!(report.rounds_seen, 2);
    assert_eq!(report.rounds_failed, 1);
    assert_eq!(report.rounds_settled, 1);
    assert_eq!(store.round("old").await.unwrap().status, RoundStatus::Committed);
    assert_eq!(store.round("new").await.unwrap().status, RoundStatus::Settled);

    let old = store.round("old").await.unwrap();
    let err = assert_err!(phase.settle_round(&old).await);
    let Some(SettlementError::MissingPayoutData { user_ids, .. }) = err.downcast_ref::<SettlementError>() else {
        panic!("expected missing payout data");
    };
    assert_eq!(user_ids, &vec!["u1".to_string()]);
}

#[tokio::test]
async fn test_missing_fill_is_recovered_on_a_later_sweep() {
    let store = store_with_round(vec![member("R", "u1", 100, Some("0xo1"))], RoundStatus::Committed).await;
    let lookups = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&lookups);

    let mut exchange = MockExch::new();
    exchange.expect_get_market_resolution().returning(|_| Ok(resolved_yes()));
    exchange
        .expect_get_order()
        .withf(|identity, order_id| identity.user_id == "u1" && order_id == "0xo1")
        .returning(move |_, order_id| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("order lookup timed out")
            }
            Ok(OrderFields {
                size_matched: Some(dec!(0.00015)),
                ..filled(order_id)
            })
        });
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(exchange));
    let (_tx, shutdown) = watch::channel(false);

    let first = phase.sweep(25, &shutdown).await.unwrap();
    assert_eq!(first.rounds_failed, 1);
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Committed);

    let second = phase.sweep(25, &shutdown).await.unwrap();
    assert_eq!(second.rounds_settled, 1);
    assert_eq!(second.payouts_inserted, 1);
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Settled);

    let members = store.get_round_members(&"R".to_string()).await.unwrap();
    assert_eq!(members[0].order.order_id.as_deref(), Some("0xo1"));
    assert_eq!(members[0].payout_amount, 150);
    assert_eq!(members[0].pnl_amount, 50);
    assert_eq!(store.ledger().await[0].amount, 150);
}

#[tokio::test]
async fn test_unresolved_market_waits_without_error() {
    let store = store_with_round(vec![member("R", "u1", 100, Some("0xo1"))], RoundStatus::Committed).await;
    let mut exchange = MockExch::new();
    exchange
        .expect_get_market_resolution()
        .returning(|_| Ok(MarketResolution::unresolved()));
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(exchange));
    let (_tx, shutdown) = watch::channel(false);

    let report = phase.sweep(25, &shutdown).await.unwrap();
    assert_eq!(report.rounds_waiting, 1);
    assert_eq!(report.rounds_failed, 0);
    assert_eq!(store.round("R").await.unwrap().status, RoundStatus::Committed);
}
