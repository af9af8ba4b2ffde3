//! Account creation commands.

use packup_client::PackupClient;
use packup_client::services::availability::Availability;

use super::CliError;

/// Check the username, then create the account.
pub async fn signup(
    client: &PackupClient,
    email: &str,
    name: &str,
    username: &str,
) -> Result<(), CliError> {
    check_username(client, username).await;

    let account = client.sign_up(email, name, username).await?;
    tracing::info!(
        "Account @{} created for {}",
        account.profile.username,
        account.profile.email
    );
    tracing::info!("A sign-in link is on its way. Run: packup signin '<link>'");
    Ok(())
}

/// Report whether `candidate` (normalised) is free.
pub async fn check_username(client: &PackupClient, candidate: &str) {
    let status = client.check_username(candidate).await;
    let normalized = client.prober().current_input();

    match status {
        Availability::Available => tracing::info!("@{normalized} is available"),
        Availability::Taken => tracing::info!("@{normalized} is taken"),
        Availability::Idle | Availability::Checking => {
            tracing::info!("Could not check @{normalized}");
        }
    }
}
