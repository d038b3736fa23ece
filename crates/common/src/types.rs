use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Identifiers that name a person acting in some role. They share the
/// underlying user identity, so an actor can be matched against them.
macro_rules! role_id {
    ($(#[$meta:meta])* $name:ident) => {
        uuid_id!($(#[$meta])* $name);

        impl $name {
            /// Returns true if this role is held by the given user.
            pub fn is(&self, user: UserId) -> bool {
                self.0 == user.as_uuid()
            }
        }

        impl From<UserId> for $name {
            fn from(user: UserId) -> Self {
                Self(user.as_uuid())
            }
        }

        impl From<$name> for UserId {
            fn from(id: $name) -> Self {
                UserId::from_uuid(id.0)
            }
        }
    };
}

uuid_id!(
    /// Identity of an authenticated user, as supplied by the edge.
    UserId
);

role_id!(
    /// A user renting rooms or subscribing to canteens.
    TenantId
);

role_id!(
    /// A user owning hostels or canteens.
    OwnerId
);

uuid_id!(HostelId);
uuid_id!(RoomId);
uuid_id!(
    /// Identifier of a booking contract record.
    ContractId
);
uuid_id!(CanteenId);
uuid_id!(SubscriptionId);
uuid_id!(FeedbackId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(RoomId::new(), RoomId::new());
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(HostelId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn role_ids_match_their_user() {
        let user = UserId::new();
        let tenant = TenantId::from(user);
        assert!(tenant.is(user));
        assert!(!tenant.is(UserId::new()));
        assert_eq!(UserId::from(tenant), user);
    }

    #[test]
    fn parses_from_string() {
        let id = ContractId::new();
        let parsed: ContractId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ContractId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let id = TenantId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
