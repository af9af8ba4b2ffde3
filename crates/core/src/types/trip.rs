//! Trip documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{DocumentId, IdentityId};
use super::status::TripMemberStatus;

/// Season a trip takes place in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

/// One member's entry in a trip's `tripMembers` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripMember {
    pub uid: IdentityId,
    pub status: TripMemberStatus,
    pub invited_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<IdentityId>,
}

/// A trip document from the `trips` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: DocumentId,
    pub owner: IdentityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub starting_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub timezone_offset: i32,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    /// Keyed by member uid.
    #[serde(default)]
    pub trip_members: BTreeMap<String, TripMember>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub trip_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_image: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl Trip {
    /// The membership record for `uid`, if they were ever invited.
    #[must_use]
    pub fn member(&self, uid: &IdentityId) -> Option<&TripMember> {
        self.trip_members.get(uid.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decodes_stored_trip() {
        let trip: Trip = serde_json::from_value(json!({
            "id": "T1",
            "owner": "u1",
            "name": "Coast walk",
            "startDate": "2025-06-01T00:00:00Z",
            "endDate": "2025-06-04T00:00:00Z",
            "season": "summer",
            "tripMembers": {
                "u1": {"uid": "u1", "status": "Owner", "invitedAt": "2025-05-01T10:00:00Z"},
                "u2": {"uid": "u2", "status": "Declined", "invitedAt": "2025-05-01T10:00:00Z"}
            }
        }))
        .unwrap();

        assert_eq!(trip.season, Some(Season::Summer));
        assert!(!trip.archived);
        assert_eq!(
            trip.member(&IdentityId::new("u2")).unwrap().status,
            TripMemberStatus::Declined
        );
        assert!(trip.member(&IdentityId::new("u3")).is_none());
    }
}
