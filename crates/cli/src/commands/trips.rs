//! Trip listing.

use packup_client::{ClientError, PackupClient};

use super::CliError;

/// Print the signed-in user's active trips, newest first.
pub async fn list(client: &PackupClient) -> Result<(), CliError> {
    client
        .session()
        .resolved()
        .await
        .ok_or(ClientError::NotSignedIn)?;

    let trips = client.trips().await?;
    if trips.is_empty() {
        tracing::info!("No trips yet");
        return Ok(());
    }

    for trip in trips {
        tracing::info!(
            "{}  {} - {}  {}",
            trip.id,
            trip.start_date.format("%Y-%m-%d"),
            trip.end_date.format("%Y-%m-%d"),
            trip.name
        );
    }
    Ok(())
}
