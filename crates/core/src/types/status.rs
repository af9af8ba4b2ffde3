//! Status enums for trip membership.

use serde::{Deserialize, Serialize};

/// Where a member stands on a trip.
///
/// Serialised with the exact casing stored in trip documents
/// (`"Owner"`, `"Pending"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripMemberStatus {
    /// Created the trip.
    Owner,
    /// Invited, has not answered yet.
    Pending,
    /// Accepted the invitation.
    Accepted,
    /// Declined the invitation.
    Declined,
    /// Removed by the trip owner.
    Removed,
}

impl TripMemberStatus {
    /// Statuses that exclude a member from their trip list.
    pub const INACTIVE: [Self; 2] = [Self::Declined, Self::Removed];

    /// Whether the member still sees the trip.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Declined | Self::Removed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Pending => "Pending",
            Self::Accepted => "Accepted",
            Self::Declined => "Declined",
            Self::Removed => "Removed",
        }
    }
}

impl std::fmt::Display for TripMemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TripMemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Owner" => Ok(Self::Owner),
            "Pending" => Ok(Self::Pending),
            "Accepted" => Ok(Self::Accepted),
            "Declined" => Ok(Self::Declined),
            "Removed" => Ok(Self::Removed),
            _ => Err(format!("invalid trip member status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_statuses() {
        assert!(TripMemberStatus::Owner.is_active());
        assert!(TripMemberStatus::Pending.is_active());
        assert!(!TripMemberStatus::Declined.is_active());
        assert!(!TripMemberStatus::Removed.is_active());
    }

    #[test]
    fn test_string_roundtrip_matches_serde() {
        for status in [
            TripMemberStatus::Owner,
            TripMemberStatus::Accepted,
            TripMemberStatus::Removed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(status.as_str().parse::<TripMemberStatus>().unwrap(), status);
        }
    }
}
