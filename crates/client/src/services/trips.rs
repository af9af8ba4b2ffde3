//! Trip and profile reads for the signed-in user.

use packup_core::{DocumentId, Filter, FilterSet, IdentityId, Profile, Trip, TripMemberStatus};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::providers::DocumentStore;
use crate::services::cache::{CacheError, DocumentCache};

/// Collection trips are stored in.
pub const TRIPS_COLLECTION: &str = "trips";

/// Query builder for the trips collection.
pub struct TripQuery;

impl TripQuery {
    /// Trips `member` belongs to and has not declined or been removed from.
    #[must_use]
    pub fn for_member(member: &IdentityId) -> FilterSet {
        FilterSet::new().with(Filter::not_in(
            format!("tripMembers.{member}.status"),
            TripMemberStatus::INACTIVE
                .iter()
                .map(|status| Value::String(status.as_str().to_owned()))
                .collect(),
        ))
    }
}

/// Active trips of `member`, newest start date first.
///
/// Archived trips are left out.
///
/// # Errors
///
/// Returns an error if the query fails or a trip does not decode.
#[instrument(skip(cache), fields(member = %member))]
pub async fn list_trips<D: DocumentStore>(
    cache: &DocumentCache<D>,
    member: &IdentityId,
) -> Result<Vec<Trip>, CacheError> {
    let documents = cache
        .read_many(TRIPS_COLLECTION, &TripQuery::for_member(member))
        .await?;

    let mut trips = documents
        .iter()
        .map(|document| {
            document.decode::<Trip>().map_err(|source| CacheError::Decode {
                collection: TRIPS_COLLECTION.to_owned(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    trips.retain(|trip| !trip.archived);
    trips.sort_by(|a, b| b.start_date.cmp(&a.start_date));

    debug!(count = trips.len(), "Listed trips");
    Ok(trips)
}

/// Profile of `identity`, if it has one.
///
/// # Errors
///
/// Returns an error if the read fails or the profile does not decode.
pub async fn read_profile<D: DocumentStore>(
    cache: &DocumentCache<D>,
    identity: &IdentityId,
) -> Result<Option<Profile>, CacheError> {
    cache
        .read_record(Profile::COLLECTION, &DocumentId::from(identity))
        .await
}
