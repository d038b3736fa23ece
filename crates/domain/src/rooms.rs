//! Hostel and room registration.
//!
//! A thin boundary: listings are owned elsewhere, but creating and deleting
//! rooms has to move the hostel counters, so it lives next to the ledger.

use common::{HostelId, Money, OwnerId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use store::{Hostel, Room, Store, StoreExt};

use crate::error::{DomainError, Result};
use crate::ledger;

/// Fields of a room being listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub label: String,
    pub capacity: u32,
    pub rent: Money,
    pub security_deposit: Money,
}

impl NewRoom {
    fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(DomainError::Validation("room label is required".to_string()));
        }
        if self.capacity == 0 {
            return Err(DomainError::Validation(
                "room capacity must be at least 1".to_string(),
            ));
        }
        if !self.rent.is_positive() {
            return Err(DomainError::Validation("rent must be positive".to_string()));
        }
        if self.security_deposit.is_negative() {
            return Err(DomainError::Validation(
                "security deposit cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct RoomService<S: Store> {
    store: S,
}

impl<S: Store> RoomService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, name))]
    pub async fn register_hostel(&self, owner_id: OwnerId, name: String) -> Result<Hostel> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation("hostel name is required".to_string()));
        }

        let hostel = Hostel::new(owner_id, name);
        let mut tx = self.store.begin().await?;
        tx.insert_hostel(&hostel).await?;
        tx.commit().await?;

        tracing::info!(hostel_id = %hostel.id, "hostel registered");
        Ok(hostel)
    }

    pub async fn get_hostel(&self, hostel_id: HostelId) -> Result<Hostel> {
        self.store
            .hostel(hostel_id)
            .await?
            .ok_or_else(|| DomainError::not_found("hostel", hostel_id))
    }

    pub async fn list_rooms(&self, hostel_id: HostelId) -> Result<Vec<Room>> {
        Ok(self.store.rooms(hostel_id).await?)
    }

    /// Lists a room in a hostel. Only the hostel's owner may add rooms.
    #[tracing::instrument(skip(self, room), fields(label = %room.label))]
    pub async fn add_room(&self, actor: UserId, hostel_id: HostelId, room: NewRoom) -> Result<Room> {
        room.validate()?;

        let mut tx = self.store.begin().await?;
        let hostel = tx
            .get_hostel(hostel_id)
            .await?
            .ok_or_else(|| DomainError::not_found("hostel", hostel_id))?;
        if !hostel.owner_id.is(actor) {
            return Err(DomainError::Unauthorized("add rooms to this hostel"));
        }

        let room = Room::new(
            hostel_id,
            room.label,
            room.capacity,
            room.rent,
            room.security_deposit,
        );
        let counters = ledger::room_created(&mut *tx, &room).await?;
        tx.commit().await?;

        tracing::info!(room_id = %room.id, counters = ?counters.after, "room added");
        Ok(room)
    }

    /// Removes an unoccupied room. Only the hostel's owner may remove rooms.
    #[tracing::instrument(skip(self))]
    pub async fn remove_room(&self, actor: UserId, room_id: RoomId) -> Result<Room> {
        let mut tx = self.store.begin().await?;
        let room = tx
            .get_room(room_id)
            .await?
            .ok_or_else(|| DomainError::not_found("room", room_id))?;
        let hostel = tx
            .get_hostel(room.hostel_id)
            .await?
            .ok_or_else(|| DomainError::not_found("hostel", room.hostel_id))?;
        if !hostel.owner_id.is(actor) {
            return Err(DomainError::Unauthorized("remove rooms from this hostel"));
        }

        let room = ledger::room_deleted(&mut *tx, room_id).await?;
        tx.commit().await?;

        tracing::info!("room removed");
        Ok(room)
    }
}
