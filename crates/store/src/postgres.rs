use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{
    CanteenId, ContractId, FeedbackId, HostelId, MealPlan, Money, OwnerId, ParseEnumError, RoomId,
    SubscriptionId, TargetKind, TenantId, UserId,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::store::{Store, StoreTx, constraints};
use crate::{
    Adjusted, BookingIntent, Canteen, Contract, ContractTerms, CounterDelta, Feedback,
    FeedbackTarget, Hostel, HostelCounters, PaymentReference, RatingSummary, Result, Room,
    StoreError, Subscription, adjust_count,
};

const HOSTEL_COLUMNS: &str = "id, owner_id, name, total_rooms, available_rooms, rating, review_count";
const ROOM_COLUMNS: &str =
    "id, hostel_id, label, capacity, rent, security_deposit, is_available, occupants";
const CONTRACT_COLUMNS: &str = "id, contract_number, tenant_id, room_id, hostel_id, owner_id, \
     monthly_rent, security_deposit, start_date, end_date, state, provider_order_id, \
     provider_payment_id, amount_paid, terms, created_at, updated_at, approved_at, closed_at";
const INTENT_COLUMNS: &str =
    "tenant_id, room_id, hostel_id, amount, provider_order_id, claimed_at";
const CANTEEN_COLUMNS: &str = "id, owner_id, name, plans, subscriber_count, rating, review_count";
const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, canteen_id, plan, duration_months, \
     monthly_price, price, start_date, end_date, status, payment_status, provider_order_id, \
     provider_payment_id, failure_reason, created_at, updated_at";
const FEEDBACK_COLUMNS: &str =
    "id, user_id, target_kind, target_id, rating, comment, created_at, updated_at";

/// PostgreSQL-backed store.
///
/// Each [`StoreTx`] is a database transaction. Single-row reads lock the row
/// with `FOR UPDATE`; uniqueness rules are backed by the constraints created
/// in `migrations/`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

/// Maps unique violations onto [`StoreError::UniqueViolation`] by constraint name.
fn write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::unique(db_err.constraint().unwrap_or("unknown"));
    }
    StoreError::Database(e)
}

fn to_u32(table: &'static str, column: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        reason: format!("{column} is negative: {value}"),
    })
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn parse_enum<T>(table: &'static str, value: &str) -> Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    value.parse().map_err(|e: ParseEnumError| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

fn row_to_hostel(row: PgRow) -> Result<Hostel> {
    Ok(Hostel {
        id: HostelId::from_uuid(row.try_get("id")?),
        owner_id: OwnerId::from_uuid(row.try_get("owner_id")?),
        name: row.try_get("name")?,
        counters: HostelCounters {
            total_rooms: to_u32("hostels", "total_rooms", row.try_get("total_rooms")?)?,
            available_rooms: to_u32("hostels", "available_rooms", row.try_get("available_rooms")?)?,
        },
        rating: RatingSummary {
            rating: row.try_get("rating")?,
            review_count: to_u32("hostels", "review_count", row.try_get("review_count")?)?,
        },
    })
}

fn row_to_room(row: PgRow) -> Result<Room> {
    let occupants: Vec<Uuid> = row.try_get("occupants")?;
    Ok(Room {
        id: RoomId::from_uuid(row.try_get("id")?),
        hostel_id: HostelId::from_uuid(row.try_get("hostel_id")?),
        label: row.try_get("label")?,
        capacity: to_u32("rooms", "capacity", row.try_get("capacity")?)?,
        rent: Money::from_minor(row.try_get("rent")?),
        security_deposit: Money::from_minor(row.try_get("security_deposit")?),
        is_available: row.try_get("is_available")?,
        occupants: occupants.into_iter().map(TenantId::from_uuid).collect(),
    })
}

fn row_to_contract(row: PgRow) -> Result<Contract> {
    let state: String = row.try_get("state")?;
    let terms: Json<ContractTerms> = row.try_get("terms")?;
    Ok(Contract {
        id: ContractId::from_uuid(row.try_get("id")?),
        contract_number: row.try_get("contract_number")?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        room_id: RoomId::from_uuid(row.try_get("room_id")?),
        hostel_id: HostelId::from_uuid(row.try_get("hostel_id")?),
        owner_id: OwnerId::from_uuid(row.try_get("owner_id")?),
        monthly_rent: Money::from_minor(row.try_get("monthly_rent")?),
        security_deposit: Money::from_minor(row.try_get("security_deposit")?),
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        state: parse_enum("contracts", &state)?,
        payment: PaymentReference {
            provider_order_id: row.try_get("provider_order_id")?,
            provider_payment_id: row.try_get("provider_payment_id")?,
            amount: Money::from_minor(row.try_get("amount_paid")?),
        },
        terms: terms.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        approved_at: row.try_get("approved_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn row_to_intent(row: PgRow) -> Result<BookingIntent> {
    Ok(BookingIntent {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        room_id: RoomId::from_uuid(row.try_get("room_id")?),
        hostel_id: HostelId::from_uuid(row.try_get("hostel_id")?),
        amount: Money::from_minor(row.try_get("amount")?),
        provider_order_id: row.try_get("provider_order_id")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

fn row_to_canteen(row: PgRow) -> Result<Canteen> {
    let plans: Json<BTreeMap<MealPlan, Money>> = row.try_get("plans")?;
    Ok(Canteen {
        id: CanteenId::from_uuid(row.try_get("id")?),
        owner_id: OwnerId::from_uuid(row.try_get("owner_id")?),
        name: row.try_get("name")?,
        plans: plans.0,
        subscriber_count: to_u32("canteens", "subscriber_count", row.try_get("subscriber_count")?)?,
        rating: RatingSummary {
            rating: row.try_get("rating")?,
            review_count: to_u32("canteens", "review_count", row.try_get("review_count")?)?,
        },
    })
}

fn row_to_subscription(row: PgRow) -> Result<Subscription> {
    let plan: String = row.try_get("plan")?;
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    Ok(Subscription {
        id: SubscriptionId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        canteen_id: CanteenId::from_uuid(row.try_get("canteen_id")?),
        plan: parse_enum("subscriptions", &plan)?,
        duration_months: to_u32(
            "subscriptions",
            "duration_months",
            row.try_get("duration_months")?,
        )?,
        monthly_price: Money::from_minor(row.try_get("monthly_price")?),
        price: Money::from_minor(row.try_get("price")?),
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        status: parse_enum("subscriptions", &status)?,
        payment_status: parse_enum("subscriptions", &payment_status)?,
        provider_order_id: row.try_get("provider_order_id")?,
        provider_payment_id: row.try_get("provider_payment_id")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_feedback(row: PgRow) -> Result<Feedback> {
    let kind: String = row.try_get("target_kind")?;
    Ok(Feedback {
        id: FeedbackId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        target: FeedbackTarget {
            kind: parse_enum("feedback", &kind)?,
            id: row.try_get("target_id")?,
        },
        rating: row.try_get("rating")?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Table holding the aggregate rating of each target kind.
fn rating_table(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Hostel => "hostels",
        TargetKind::Canteen => "canteens",
        TargetKind::Order => "order_ratings",
    }
}

fn rating_key(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Hostel | TargetKind::Canteen => "id",
        TargetKind::Order => "order_id",
    }
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn get_hostel(&mut self, id: HostelId) -> Result<Option<Hostel>> {
        let sql = format!("SELECT {HOSTEL_COLUMNS} FROM hostels WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_hostel).transpose()
    }

    async fn insert_hostel(&mut self, hostel: &Hostel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hostels (id, owner_id, name, total_rooms, available_rooms, rating, review_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(hostel.id.as_uuid())
        .bind(hostel.owner_id.as_uuid())
        .bind(&hostel.name)
        .bind(to_i32(hostel.counters.total_rooms))
        .bind(to_i32(hostel.counters.available_rooms))
        .bind(hostel.rating.rating)
        .bind(to_i32(hostel.rating.review_count))
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn adjust_hostel_counters(
        &mut self,
        id: HostelId,
        delta: CounterDelta,
    ) -> Result<Adjusted<HostelCounters>> {
        let hostel = self
            .get_hostel(id)
            .await?
            .ok_or_else(|| StoreError::not_found("hostel", id))?;
        let adjusted = hostel.counters.apply(delta);
        self.set_hostel_counters(id, adjusted.after).await?;
        Ok(adjusted)
    }

    async fn set_hostel_counters(
        &mut self,
        id: HostelId,
        counters: HostelCounters,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE hostels SET total_rooms = $2, available_rooms = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(to_i32(counters.total_rooms))
        .bind(to_i32(counters.available_rooms))
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("hostel", id));
        }
        Ok(())
    }

    async fn get_room(&mut self, id: RoomId) -> Result<Option<Room>> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_room).transpose()
    }

    async fn list_rooms(&mut self, hostel_id: HostelId) -> Result<Vec<Room>> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE hostel_id = $1 ORDER BY label, id");
        let rows = sqlx::query(&sql)
            .bind(hostel_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_room).collect()
    }

    async fn lock_rooms(&mut self, hostel_id: HostelId) -> Result<Vec<Room>> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE hostel_id = $1 ORDER BY label, id FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(hostel_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_room).collect()
    }

    async fn insert_room(&mut self, room: &Room) -> Result<()> {
        let occupants: Vec<Uuid> = room.occupants.iter().map(|t| t.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO rooms (id, hostel_id, label, capacity, rent, security_deposit, is_available, occupants)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(room.id.as_uuid())
        .bind(room.hostel_id.as_uuid())
        .bind(&room.label)
        .bind(to_i32(room.capacity))
        .bind(room.rent.minor())
        .bind(room.security_deposit.minor())
        .bind(room.is_available)
        .bind(occupants)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn update_room(&mut self, room: &Room) -> Result<()> {
        let occupants: Vec<Uuid> = room.occupants.iter().map(|t| t.as_uuid()).collect();
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET label = $2, capacity = $3, rent = $4, security_deposit = $5,
                is_available = $6, occupants = $7
            WHERE id = $1
            "#,
        )
        .bind(room.id.as_uuid())
        .bind(&room.label)
        .bind(to_i32(room.capacity))
        .bind(room.rent.minor())
        .bind(room.security_deposit.minor())
        .bind(room.is_available)
        .bind(occupants)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("room", room.id));
        }
        Ok(())
    }

    async fn delete_room(&mut self, id: RoomId) -> Result<()> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("room", id));
        }
        Ok(())
    }

    async fn get_contract(&mut self, id: ContractId) -> Result<Option<Contract>> {
        let sql = format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_contract).transpose()
    }

    async fn find_contract_by_provider_order(
        &mut self,
        provider_order_id: &str,
    ) -> Result<Option<Contract>> {
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE provider_order_id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(provider_order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_contract).transpose()
    }

    async fn find_open_contract(&mut self, tenant_id: TenantId) -> Result<Option<Contract>> {
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts \
             WHERE tenant_id = $1 AND state IN ('draft', 'pending_signatures', 'active') \
             FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_contract).transpose()
    }

    async fn list_contracts_for_tenant(&mut self, tenant_id: TenantId) -> Result<Vec<Contract>> {
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE tenant_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_contract).collect()
    }

    async fn insert_contract(&mut self, contract: &Contract) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contracts (
                id, contract_number, tenant_id, room_id, hostel_id, owner_id,
                monthly_rent, security_deposit, start_date, end_date, state,
                provider_order_id, provider_payment_id, amount_paid, terms,
                created_at, updated_at, approved_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(contract.id.as_uuid())
        .bind(&contract.contract_number)
        .bind(contract.tenant_id.as_uuid())
        .bind(contract.room_id.as_uuid())
        .bind(contract.hostel_id.as_uuid())
        .bind(contract.owner_id.as_uuid())
        .bind(contract.monthly_rent.minor())
        .bind(contract.security_deposit.minor())
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(contract.state.as_str())
        .bind(&contract.payment.provider_order_id)
        .bind(&contract.payment.provider_payment_id)
        .bind(contract.payment.amount.minor())
        .bind(Json(&contract.terms))
        .bind(contract.created_at)
        .bind(contract.updated_at)
        .bind(contract.approved_at)
        .bind(contract.closed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn update_contract(&mut self, contract: &Contract) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contracts
            SET state = $2, updated_at = $3, approved_at = $4, closed_at = $5, terms = $6
            WHERE id = $1
            "#,
        )
        .bind(contract.id.as_uuid())
        .bind(contract.state.as_str())
        .bind(contract.updated_at)
        .bind(contract.approved_at)
        .bind(contract.closed_at)
        .bind(Json(&contract.terms))
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("contract", contract.id));
        }
        Ok(())
    }

    async fn get_booking_intent(&mut self, tenant_id: TenantId) -> Result<Option<BookingIntent>> {
        let sql =
            format!("SELECT {INTENT_COLUMNS} FROM booking_intents WHERE tenant_id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_intent).transpose()
    }

    async fn claim_booking_intent(
        &mut self,
        intent: &BookingIntent,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed = sqlx::query(
            r#"
            INSERT INTO booking_intents (tenant_id, room_id, hostel_id, amount, provider_order_id, claimed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id) DO UPDATE SET
                room_id = EXCLUDED.room_id,
                hostel_id = EXCLUDED.hostel_id,
                amount = EXCLUDED.amount,
                provider_order_id = EXCLUDED.provider_order_id,
                claimed_at = EXCLUDED.claimed_at
            WHERE booking_intents.provider_order_id IS NOT NULL
               OR booking_intents.claimed_at < $7
            RETURNING tenant_id
            "#,
        )
        .bind(intent.tenant_id.as_uuid())
        .bind(intent.room_id.as_uuid())
        .bind(intent.hostel_id.as_uuid())
        .bind(intent.amount.minor())
        .bind(&intent.provider_order_id)
        .bind(intent.claimed_at)
        .bind(stale_before)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(claimed.is_some())
    }

    async fn put_booking_intent(&mut self, intent: &BookingIntent) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE booking_intents
            SET room_id = $2, hostel_id = $3, amount = $4, provider_order_id = $5, claimed_at = $6
            WHERE tenant_id = $1
            "#,
        )
        .bind(intent.tenant_id.as_uuid())
        .bind(intent.room_id.as_uuid())
        .bind(intent.hostel_id.as_uuid())
        .bind(intent.amount.minor())
        .bind(&intent.provider_order_id)
        .bind(intent.claimed_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("booking intent", intent.tenant_id));
        }
        Ok(())
    }

    async fn delete_booking_intent(&mut self, tenant_id: TenantId) -> Result<()> {
        sqlx::query("DELETE FROM booking_intents WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_canteen(&mut self, id: CanteenId) -> Result<Option<Canteen>> {
        let sql = format!("SELECT {CANTEEN_COLUMNS} FROM canteens WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_canteen).transpose()
    }

    async fn insert_canteen(&mut self, canteen: &Canteen) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO canteens (id, owner_id, name, plans, subscriber_count, rating, review_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(canteen.id.as_uuid())
        .bind(canteen.owner_id.as_uuid())
        .bind(&canteen.name)
        .bind(Json(&canteen.plans))
        .bind(to_i32(canteen.subscriber_count))
        .bind(canteen.rating.rating)
        .bind(to_i32(canteen.rating.review_count))
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn adjust_subscriber_count(
        &mut self,
        id: CanteenId,
        delta: i32,
    ) -> Result<Adjusted<u32>> {
        let canteen = self
            .get_canteen(id)
            .await?
            .ok_or_else(|| StoreError::not_found("canteen", id))?;
        let adjusted = adjust_count(canteen.subscriber_count, delta);
        self.set_subscriber_count(id, adjusted.after).await?;
        Ok(adjusted)
    }

    async fn set_subscriber_count(&mut self, id: CanteenId, count: u32) -> Result<()> {
        let result = sqlx::query("UPDATE canteens SET subscriber_count = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to_i32(count))
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("canteen", id));
        }
        Ok(())
    }

    async fn get_subscription(&mut self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let sql =
            format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_subscription).transpose()
    }

    async fn list_subscriptions_for_canteen(
        &mut self,
        canteen_id: CanteenId,
    ) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE canteen_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(canteen_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_subscription).collect()
    }

    async fn find_live_subscription(
        &mut self,
        tenant_id: TenantId,
        canteen_id: CanteenId,
    ) -> Result<Option<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE tenant_id = $1 AND canteen_id = $2 AND status IN ('active', 'paused') \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(canteen_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_subscription).transpose()
    }

    async fn list_live_subscriptions_ending_before(
        &mut self,
        date: NaiveDate,
    ) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE status IN ('active', 'paused') AND end_date < $1 \
             ORDER BY end_date FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(date)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_subscription).collect()
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, canteen_id, plan, duration_months, monthly_price, price,
                start_date, end_date, status, payment_status, provider_order_id,
                provider_payment_id, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.tenant_id.as_uuid())
        .bind(subscription.canteen_id.as_uuid())
        .bind(subscription.plan.as_str())
        .bind(to_i32(subscription.duration_months))
        .bind(subscription.monthly_price.minor())
        .bind(subscription.price.minor())
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.status.as_str())
        .bind(subscription.payment_status.as_str())
        .bind(&subscription.provider_order_id)
        .bind(&subscription.provider_payment_id)
        .bind(&subscription.failure_reason)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET start_date = $2, end_date = $3, status = $4, payment_status = $5,
                provider_payment_id = $6, failure_reason = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.status.as_str())
        .bind(subscription.payment_status.as_str())
        .bind(&subscription.provider_payment_id)
        .bind(&subscription.failure_reason)
        .bind(subscription.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("subscription", subscription.id));
        }
        Ok(())
    }

    async fn lock_feedback_target(&mut self, target: FeedbackTarget) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("feedback:{}:{}", target.kind.as_str(), target.id))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_feedback(&mut self, target: FeedbackTarget) -> Result<Vec<Feedback>> {
        let sql = format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback \
             WHERE target_kind = $1 AND target_id = $2 ORDER BY updated_at"
        );
        let rows = sqlx::query(&sql)
            .bind(target.kind.as_str())
            .bind(target.id)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_feedback).collect()
    }

    async fn upsert_feedback(&mut self, feedback: &Feedback) -> Result<Feedback> {
        let sql = format!(
            "INSERT INTO feedback (id, user_id, target_kind, target_id, rating, comment, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT ON CONSTRAINT {} DO UPDATE SET \
             rating = EXCLUDED.rating, comment = EXCLUDED.comment, updated_at = EXCLUDED.updated_at \
             RETURNING {FEEDBACK_COLUMNS}",
            constraints::FEEDBACK_USER_TARGET
        );
        let row = sqlx::query(&sql)
            .bind(feedback.id.as_uuid())
            .bind(feedback.user_id.as_uuid())
            .bind(feedback.target.kind.as_str())
            .bind(feedback.target.id)
            .bind(feedback.rating)
            .bind(&feedback.comment)
            .bind(feedback.created_at)
            .bind(feedback.updated_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(write_error)?;
        row_to_feedback(row)
    }

    async fn get_rating(&mut self, target: FeedbackTarget) -> Result<Option<RatingSummary>> {
        let sql = format!(
            "SELECT rating, review_count FROM {} WHERE {} = $1",
            rating_table(target.kind),
            rating_key(target.kind)
        );
        let row = sqlx::query(&sql)
            .bind(target.id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| {
            Ok(RatingSummary {
                rating: row.try_get("rating")?,
                review_count: to_u32("ratings", "review_count", row.try_get("review_count")?)?,
            })
        })
        .transpose()
    }

    async fn set_rating(
        &mut self,
        target: FeedbackTarget,
        summary: RatingSummary,
    ) -> Result<bool> {
        let sql = match target.kind {
            TargetKind::Hostel | TargetKind::Canteen => format!(
                "UPDATE {} SET rating = $2, review_count = $3 WHERE id = $1",
                rating_table(target.kind)
            ),
            TargetKind::Order => "INSERT INTO order_ratings (order_id, rating, review_count) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (order_id) DO UPDATE SET \
                 rating = EXCLUDED.rating, review_count = EXCLUDED.review_count"
                .to_string(),
        };
        let result = sqlx::query(&sql)
            .bind(target.id)
            .bind(summary.rating)
            .bind(to_i32(summary.review_count))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
