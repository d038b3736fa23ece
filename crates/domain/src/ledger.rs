//! Counter Ledger.
//!
//! Hostel `total_rooms` / `available_rooms` and canteen `subscriber_count`
//! are summaries of Room and Subscription rows. Every change to those rows
//! goes through the functions here, inside the same [`StoreTx`] as the row
//! change, so the summaries move atomically with what they summarize.
//!
//! Adjustments are floored at zero (and `available_rooms` capped at
//! `total_rooms`). A floor or cap that actually bites means the stored
//! counter had drifted; it is logged and counted, and
//! [`CounterLedger::reconcile_hostel`] / [`CounterLedger::reconcile_canteen`]
//! rebuild the counter from the rows.

use std::collections::HashSet;

use common::{CanteenId, HostelId, RoomId, SubscriptionStatus, TenantId};
use serde::Serialize;
use store::{Adjusted, CounterDelta, HostelCounters, Room, Store, StoreTx};

use crate::error::{DomainError, Result};

fn record_drift<T: std::fmt::Debug>(counter: &'static str, owner: &str, adjusted: &Adjusted<T>) {
    if adjusted.clamped {
        tracing::warn!(
            counter,
            owner,
            before = ?adjusted.before,
            after = ?adjusted.after,
            "counter drift detected, adjustment clamped"
        );
        metrics::counter!("ledger_drift_detected_total", "counter" => counter).increment(1);
    }
}

async fn adjust_hostel(
    tx: &mut dyn StoreTx,
    hostel_id: HostelId,
    delta: CounterDelta,
) -> Result<Adjusted<HostelCounters>> {
    let adjusted = tx.adjust_hostel_counters(hostel_id, delta).await?;
    record_drift("hostel_rooms", &hostel_id.to_string(), &adjusted);
    Ok(adjusted)
}

/// Inserts a new room and counts it.
pub async fn room_created(tx: &mut dyn StoreTx, room: &Room) -> Result<Adjusted<HostelCounters>> {
    tx.insert_room(room).await?;
    let delta = CounterDelta {
        total: 1,
        available: i32::from(room.is_available),
    };
    adjust_hostel(tx, room.hostel_id, delta).await
}

/// Deletes a room and uncounts it. Occupied rooms cannot be deleted.
pub async fn room_deleted(tx: &mut dyn StoreTx, room_id: RoomId) -> Result<Room> {
    let room = tx
        .get_room(room_id)
        .await?
        .ok_or_else(|| DomainError::not_found("room", room_id))?;
    if !room.occupants.is_empty() {
        return Err(DomainError::invalid_transition("room", "occupied", "delete"));
    }

    tx.delete_room(room_id).await?;
    let delta = CounterDelta {
        total: -1,
        available: -i32::from(room.is_available),
    };
    adjust_hostel(tx, room.hostel_id, delta).await?;
    Ok(room)
}

/// Moves a tenant into a room.
///
/// The hostel's `available_rooms` drops only when the room goes from
/// empty to occupied.
pub async fn occupy(tx: &mut dyn StoreTx, room_id: RoomId, tenant_id: TenantId) -> Result<Room> {
    let mut room = tx
        .get_room(room_id)
        .await?
        .ok_or_else(|| DomainError::not_found("room", room_id))?;

    if room.occupants.contains(&tenant_id) {
        return Ok(room);
    }
    if room.is_full() {
        return Err(DomainError::CapacityExceeded {
            room_id,
            capacity: room.capacity,
        });
    }

    let was_available = room.is_available;
    room.occupants.push(tenant_id);
    room.is_available = false;
    tx.update_room(&room).await?;

    if was_available {
        adjust_hostel(tx, room.hostel_id, CounterDelta::available(-1)).await?;
    }
    Ok(room)
}

/// Moves a tenant out of a room.
///
/// The hostel's `available_rooms` rises only when the room becomes empty.
pub async fn release(tx: &mut dyn StoreTx, room_id: RoomId, tenant_id: TenantId) -> Result<Room> {
    let mut room = tx
        .get_room(room_id)
        .await?
        .ok_or_else(|| DomainError::not_found("room", room_id))?;

    let before = room.occupants.len();
    room.occupants.retain(|t| *t != tenant_id);
    if room.occupants.len() == before {
        tracing::warn!(%room_id, %tenant_id, "released tenant was not an occupant");
        metrics::counter!("ledger_drift_detected_total", "counter" => "room_occupants")
            .increment(1);
    }

    let becomes_available = room.occupants.is_empty() && !room.is_available;
    room.is_available = room.occupants.is_empty();
    tx.update_room(&room).await?;

    if becomes_available {
        adjust_hostel(tx, room.hostel_id, CounterDelta::available(1)).await?;
    }
    Ok(room)
}

/// Counts a subscription entering the active state.
pub async fn subscriber_joined(tx: &mut dyn StoreTx, canteen_id: CanteenId) -> Result<u32> {
    let adjusted = tx.adjust_subscriber_count(canteen_id, 1).await?;
    record_drift("subscriber_count", &canteen_id.to_string(), &adjusted);
    Ok(adjusted.after)
}

/// Uncounts a subscription leaving the active state.
pub async fn subscriber_left(tx: &mut dyn StoreTx, canteen_id: CanteenId) -> Result<u32> {
    let adjusted = tx.adjust_subscriber_count(canteen_id, -1).await?;
    record_drift("subscriber_count", &canteen_id.to_string(), &adjusted);
    Ok(adjusted.after)
}

/// Result of rebuilding a hostel's counters from its rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostelReconciliation {
    pub hostel_id: HostelId,
    pub before: HostelCounters,
    pub after: HostelCounters,
    /// Rooms whose availability flag disagreed with their occupants.
    pub rooms_repaired: u32,
}

impl HostelReconciliation {
    pub fn drifted(&self) -> bool {
        self.before != self.after || self.rooms_repaired > 0
    }
}

/// Result of rebuilding a canteen's subscriber count from its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanteenReconciliation {
    pub canteen_id: CanteenId,
    pub before: u32,
    pub after: u32,
}

impl CanteenReconciliation {
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}

/// Rebuilds and audits counters against the rows they summarize.
#[derive(Clone)]
pub struct CounterLedger<S: Store> {
    store: S,
}

impl<S: Store> CounterLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Recomputes a hostel's counters from its rooms. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_hostel(&self, hostel_id: HostelId) -> Result<HostelReconciliation> {
        let mut tx = self.store.begin().await?;
        let locked: HashSet<RoomId> = tx
            .lock_rooms(hostel_id)
            .await?
            .into_iter()
            .map(|room| room.id)
            .collect();
        let hostel = tx
            .get_hostel(hostel_id)
            .await?
            .ok_or_else(|| DomainError::not_found("hostel", hostel_id))?;

        // Rooms added while waiting for the hostel are counted but not repaired
        let mut rooms = tx.list_rooms(hostel_id).await?;
        let mut rooms_repaired = 0;
        for room in rooms.iter_mut() {
            let available = room.occupants.is_empty();
            if room.is_available != available && locked.contains(&room.id) {
                room.is_available = available;
                tx.update_room(room).await?;
                rooms_repaired += 1;
            }
        }

        let after = HostelCounters::from_rooms(&rooms);
        if after != hostel.counters {
            tx.set_hostel_counters(hostel_id, after).await?;
        }
        tx.commit().await?;

        let report = HostelReconciliation {
            hostel_id,
            before: hostel.counters,
            after,
            rooms_repaired,
        };
        if report.drifted() {
            tracing::warn!(?report, "hostel counters repaired");
            metrics::counter!("ledger_reconciliations_repaired_total", "kind" => "hostel")
                .increment(1);
        } else {
            tracing::debug!("hostel counters consistent");
        }
        Ok(report)
    }

    /// Recomputes a canteen's subscriber count from its subscriptions. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_canteen(&self, canteen_id: CanteenId) -> Result<CanteenReconciliation> {
        let mut tx = self.store.begin().await?;
        let canteen = tx
            .get_canteen(canteen_id)
            .await?
            .ok_or_else(|| DomainError::not_found("canteen", canteen_id))?;

        let after = active_count(tx.list_subscriptions_for_canteen(canteen_id).await?);
        if after != canteen.subscriber_count {
            tx.set_subscriber_count(canteen_id, after).await?;
        }
        tx.commit().await?;

        let report = CanteenReconciliation {
            canteen_id,
            before: canteen.subscriber_count,
            after,
        };
        if report.drifted() {
            tracing::warn!(?report, "subscriber count repaired");
            metrics::counter!("ledger_reconciliations_repaired_total", "kind" => "canteen")
                .increment(1);
        }
        Ok(report)
    }

    /// Checks a hostel's counters without changing anything.
    pub async fn audit_hostel(&self, hostel_id: HostelId) -> Result<HostelCounters> {
        let mut tx = self.store.begin().await?;
        let hostel = tx
            .get_hostel(hostel_id)
            .await?
            .ok_or_else(|| DomainError::not_found("hostel", hostel_id))?;
        let rooms = tx.list_rooms(hostel_id).await?;

        let expected = HostelCounters {
            total_rooms: rooms.len() as u32,
            available_rooms: rooms.iter().filter(|r| r.occupants.is_empty()).count() as u32,
        };
        if expected != hostel.counters {
            return Err(DomainError::InvariantViolation(format!(
                "hostel {hostel_id} counters {:?} disagree with rooms {:?}",
                hostel.counters, expected
            )));
        }
        Ok(expected)
    }

    /// Checks a canteen's subscriber count without changing anything.
    pub async fn audit_canteen(&self, canteen_id: CanteenId) -> Result<u32> {
        let mut tx = self.store.begin().await?;
        let canteen = tx
            .get_canteen(canteen_id)
            .await?
            .ok_or_else(|| DomainError::not_found("canteen", canteen_id))?;
        let expected = active_count(tx.list_subscriptions_for_canteen(canteen_id).await?);
        if expected != canteen.subscriber_count {
            return Err(DomainError::InvariantViolation(format!(
                "canteen {canteen_id} subscriber_count {} disagrees with {expected} active subscriptions",
                canteen.subscriber_count
            )));
        }
        Ok(expected)
    }
}

fn active_count(subscriptions: Vec<store::Subscription>) -> u32 {
    subscriptions
        .iter()
        .filter(|s| s.status == SubscriptionStatus::Active)
        .count() as u32
}
