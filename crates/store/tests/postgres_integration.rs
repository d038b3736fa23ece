//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate the tables
//! before each test, so they run serially.
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use common::{
    CanteenId, ContractId, ContractState, MealPlan, Money, OwnerId, PaymentStatus, RoomId,
    SubscriptionId, SubscriptionStatus, TargetKind, TenantId, UserId,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    BookingIntent, Canteen, Contract, ContractTerms, CounterDelta, Feedback, FeedbackTarget,
    Hostel, HostelCounters, PaymentReference, PostgresStore, RatingSummary, Room, Store, StoreExt,
    Subscription, constraints,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_marketplace_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE feedback, order_ratings, subscriptions, canteens, booking_intents, \
         contracts, rooms, hostels",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

/// Current time at the precision PostgreSQL stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn test_contract(tenant_id: TenantId, order_id: &str, state: ContractState) -> Contract {
    let now = now();
    Contract {
        id: ContractId::new(),
        contract_number: format!("CTR-{}", Uuid::new_v4().simple()),
        tenant_id,
        room_id: RoomId::new(),
        hostel_id: common::HostelId::new(),
        owner_id: OwnerId::new(),
        monthly_rent: Money::from_major(8000),
        security_deposit: Money::from_major(8000),
        start_date: now.date_naive(),
        end_date: now.date_naive() + Duration::days(365),
        state,
        payment: PaymentReference {
            provider_order_id: order_id.to_string(),
            provider_payment_id: format!("pay_{order_id}"),
            amount: Money::from_major(16000),
        },
        terms: ContractTerms {
            notice_period_days: 30,
            rent_due_day: 5,
            late_fee_per_day: Money::from_major(50),
            early_termination_penalty: Money::from_major(8000),
            clauses: vec!["No smoking".to_string()],
        },
        created_at: now,
        updated_at: now,
        approved_at: None,
        closed_at: None,
    }
}

#[tokio::test]
#[serial]
async fn hostel_and_rooms_round_trip() {
    let store = get_test_store().await;
    let hostel = Hostel::new(OwnerId::new(), "Lakeside");
    let mut room = Room::new(hostel.id, "101", 2, Money::from_major(6000), Money::from_major(6000));
    room.occupants.push(TenantId::new());

    let mut tx = store.begin().await.unwrap();
    tx.insert_hostel(&hostel).await.unwrap();
    tx.insert_room(&room).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.hostel(hostel.id).await.unwrap(), Some(hostel.clone()));
    assert_eq!(store.rooms(hostel.id).await.unwrap(), vec![room]);
}

#[tokio::test]
#[serial]
async fn locked_rooms_hold_off_other_writers() {
    let store = get_test_store().await;
    let hostel = Hostel::new(OwnerId::new(), "Lakeside");
    let room = Room::new(hostel.id, "101", 1, Money::from_major(6000), Money::from_major(6000));

    let mut tx = store.begin().await.unwrap();
    tx.insert_hostel(&hostel).await.unwrap();
    tx.insert_room(&room).await.unwrap();
    tx.commit().await.unwrap();

    let mut reconciling = store.begin().await.unwrap();
    assert_eq!(reconciling.lock_rooms(hostel.id).await.unwrap(), vec![room.clone()]);

    let contender = store.clone();
    let room_id = room.id;
    let waiting = tokio::spawn(async move {
        let mut tx = contender.begin().await.unwrap();
        tx.get_room(room_id).await.unwrap();
        tx.commit().await.unwrap();
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    reconciling.commit().await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[serial]
async fn counter_adjustments_clamp_at_zero() {
    let store = get_test_store().await;
    let hostel = Hostel::new(OwnerId::new(), "Lakeside");

    let mut tx = store.begin().await.unwrap();
    tx.insert_hostel(&hostel).await.unwrap();
    tx.adjust_hostel_counters(hostel.id, CounterDelta { total: 1, available: 1 })
        .await
        .unwrap();
    let adjusted = tx
        .adjust_hostel_counters(hostel.id, CounterDelta::available(-2))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(adjusted.clamped);
    let stored = store.hostel(hostel.id).await.unwrap().unwrap();
    assert_eq!(
        stored.counters,
        HostelCounters {
            total_rooms: 1,
            available_rooms: 0
        }
    );
}

#[tokio::test]
#[serial]
async fn rollback_discards_writes() {
    let store = get_test_store().await;
    let hostel = Hostel::new(OwnerId::new(), "Lakeside");

    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_hostel(&hostel).await.unwrap();
    }

    assert!(store.hostel(hostel.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn one_open_contract_per_tenant() {
    let store = get_test_store().await;
    let tenant_id = TenantId::new();

    let mut tx = store.begin().await.unwrap();
    tx.insert_contract(&test_contract(tenant_id, "order_a", ContractState::Terminated))
        .await
        .unwrap();
    tx.insert_contract(&test_contract(
        tenant_id,
        "order_b",
        ContractState::PendingSignatures,
    ))
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_contract(&test_contract(tenant_id, "order_c", ContractState::Active))
        .await
        .unwrap_err();
    assert!(err.violates(constraints::CONTRACT_OPEN_PER_TENANT));
}

#[tokio::test]
#[serial]
async fn provider_order_id_is_unique() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    tx.insert_contract(&test_contract(TenantId::new(), "order_a", ContractState::Rejected))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_contract(&test_contract(
            TenantId::new(),
            "order_a",
            ContractState::PendingSignatures,
        ))
        .await
        .unwrap_err();
    assert!(err.violates(constraints::CONTRACT_PROVIDER_ORDER));
}

#[tokio::test]
#[serial]
async fn contract_terms_survive_storage() {
    let store = get_test_store().await;
    let contract = test_contract(TenantId::new(), "order_a", ContractState::PendingSignatures);

    let mut tx = store.begin().await.unwrap();
    tx.insert_contract(&contract).await.unwrap();
    let found = tx.find_contract_by_provider_order("order_a").await.unwrap();
    tx.commit().await.unwrap();

    let found = found.unwrap();
    assert_eq!(found.terms, contract.terms);
    assert_eq!(found.payment, contract.payment);
    assert_eq!(found.state, ContractState::PendingSignatures);
}

#[tokio::test]
#[serial]
async fn booking_claims_respect_in_flight_claims() {
    let store = get_test_store().await;
    let now = now();
    let intent = BookingIntent {
        tenant_id: TenantId::new(),
        room_id: RoomId::new(),
        hostel_id: common::HostelId::new(),
        amount: Money::from_major(16000),
        provider_order_id: None,
        claimed_at: now,
    };
    let stale_before = now - Duration::seconds(60);

    let mut tx = store.begin().await.unwrap();
    assert!(tx.claim_booking_intent(&intent, stale_before).await.unwrap());
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(!tx.claim_booking_intent(&intent, stale_before).await.unwrap());

    let ordered = BookingIntent {
        provider_order_id: Some("order_a".to_string()),
        ..intent.clone()
    };
    tx.put_booking_intent(&ordered).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        store.booking_intent(intent.tenant_id).await.unwrap(),
        Some(ordered)
    );

    let mut tx = store.begin().await.unwrap();
    assert!(tx.claim_booking_intent(&intent, stale_before).await.unwrap());
}

#[tokio::test]
#[serial]
async fn subscriptions_and_subscriber_counts() {
    let store = get_test_store().await;
    let canteen = Canteen::new(OwnerId::new(), "Mess Hall").with_plan(MealPlan::AllMeals, Money::from_major(3000));
    let today = now().date_naive();
    let now = now();
    let subscription = Subscription {
        id: SubscriptionId::new(),
        tenant_id: TenantId::new(),
        canteen_id: canteen.id,
        plan: MealPlan::AllMeals,
        duration_months: 1,
        monthly_price: Money::from_major(3000),
        price: Money::from_major(3000),
        start_date: today - Duration::days(40),
        end_date: today - Duration::days(10),
        status: SubscriptionStatus::Active,
        payment_status: PaymentStatus::Paid,
        provider_order_id: "order_s".to_string(),
        provider_payment_id: Some("pay_s".to_string()),
        failure_reason: None,
        created_at: now,
        updated_at: now,
    };

    let mut tx = store.begin().await.unwrap();
    tx.insert_canteen(&canteen).await.unwrap();
    tx.insert_subscription(&subscription).await.unwrap();
    let adjusted = tx.adjust_subscriber_count(canteen.id, 1).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(adjusted.after, 1);

    let stored = store.canteen(canteen.id).await.unwrap().unwrap();
    assert_eq!(stored.plans, canteen.plans);

    let mut tx = store.begin().await.unwrap();
    let due = tx.list_live_subscriptions_ending_before(today).await.unwrap();
    assert_eq!(due, vec![subscription.clone()]);
    let live = tx
        .find_live_subscription(subscription.tenant_id, canteen.id)
        .await
        .unwrap();
    assert_eq!(live.map(|s| s.id), Some(subscription.id));
    assert!(tx.get_canteen(CanteenId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn feedback_upsert_replaces_the_users_row() {
    let store = get_test_store().await;
    let hostel = Hostel::new(OwnerId::new(), "Lakeside");
    let target = FeedbackTarget::new(TargetKind::Hostel, hostel.id);
    let now = now();
    let feedback = Feedback {
        id: common::FeedbackId::new(),
        user_id: UserId::new(),
        target,
        rating: 4.0,
        comment: "Clean rooms".to_string(),
        created_at: now,
        updated_at: now,
    };

    let mut tx = store.begin().await.unwrap();
    tx.insert_hostel(&hostel).await.unwrap();
    tx.lock_feedback_target(target).await.unwrap();
    assert_eq!(tx.upsert_feedback(&feedback).await.unwrap(), feedback);
    let summary = RatingSummary {
        rating: 4.0,
        review_count: 1,
    };
    assert!(tx.set_rating(target, summary).await.unwrap());
    tx.commit().await.unwrap();

    assert_eq!(store.rating(target).await.unwrap(), Some(summary));

    let mut tx = store.begin().await.unwrap();
    tx.lock_feedback_target(target).await.unwrap();
    let replacement = Feedback {
        id: common::FeedbackId::new(),
        rating: 2.0,
        comment: "Hot water broke".to_string(),
        ..feedback.clone()
    };
    let stored = tx.upsert_feedback(&replacement).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(stored.id, feedback.id);
    assert_eq!(stored.created_at, feedback.created_at);
    assert_eq!(stored.rating, 2.0);
    assert_eq!(store.feedback_for(target).await.unwrap(), vec![stored]);
}

#[tokio::test]
#[serial]
async fn feedback_lock_serializes_writers_on_a_target() {
    let store = get_test_store().await;
    let target = FeedbackTarget::new(TargetKind::Order, Uuid::new_v4());

    let mut first = store.begin().await.unwrap();
    first.lock_feedback_target(target).await.unwrap();

    let contender = store.clone();
    let waiting = tokio::spawn(async move {
        let mut tx = contender.begin().await.unwrap();
        tx.lock_feedback_target(target).await.unwrap();
        tx.commit().await.unwrap();
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    first.commit().await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[serial]
async fn order_ratings_upsert() {
    let store = get_test_store().await;
    let target = FeedbackTarget::new(TargetKind::Order, Uuid::new_v4());

    for count in 1..=2 {
        let mut tx = store.begin().await.unwrap();
        let summary = RatingSummary {
            rating: 3.5,
            review_count: count,
        };
        assert!(tx.set_rating(target, summary).await.unwrap());
        tx.commit().await.unwrap();
    }

    assert_eq!(
        store.rating(target).await.unwrap().map(|s| s.review_count),
        Some(2)
    );
}
