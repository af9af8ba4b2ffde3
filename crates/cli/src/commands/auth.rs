//! Sign-in, session and sign-out commands.

use packup_client::{ClientError, PackupClient, Route};
use url::Url;

use super::CliError;
use crate::prompt::StdinPrompt;

/// Email a sign-in link.
pub async fn login(client: &PackupClient, email: &str) -> Result<(), CliError> {
    let email = client.request_link(email).await?;
    tracing::info!("Sign-in link sent to {email}");
    tracing::info!("Open the email and run: packup signin '<link>'");
    Ok(())
}

/// Exchange the link pasted from the email.
///
/// Without a pending sign-in on this machine the email is asked for on stdin.
pub async fn signin(client: &PackupClient, raw_url: &str) -> Result<(), CliError> {
    let url = Url::parse(raw_url.trim())?;

    match client.complete_link(&url, &StdinPrompt).await {
        Ok(Some(outcome)) => {
            let who = outcome
                .session
                .email
                .as_ref()
                .map_or_else(|| outcome.session.identity_id.to_string(), ToString::to_string);
            tracing::info!("Signed in as {who}");
            tracing::info!("Continue at {}", outcome.redirect);
            Ok(())
        }
        Ok(None) => Err(CliError::NotASignInLink),
        Err(err) => {
            if let Some(route) = next_route(&err) {
                tracing::info!("Continue at {route}");
            }
            Err(err.into())
        }
    }
}

/// Where a failed link exchange sends the user.
fn next_route(err: &ClientError) -> Option<Route> {
    match err {
        ClientError::Link(err) => err.next_route(),
        _ => None,
    }
}

/// Show the signed-in user.
pub async fn whoami(client: &PackupClient) -> Result<(), CliError> {
    let session = client
        .session()
        .resolved()
        .await
        .ok_or(ClientError::NotSignedIn)?;

    match client.profile().await? {
        Some(profile) => tracing::info!(
            "{} (@{}) <{}>",
            profile.display_name,
            profile.username,
            profile.email
        ),
        None => tracing::info!(
            "Signed in as {} (no profile)",
            session.email.map_or_else(|| session.identity_id.to_string(), |e| e.to_string())
        ),
    }
    Ok(())
}

pub async fn logout(client: &PackupClient) -> Result<(), CliError> {
    client.session().resolved().await;
    client.sign_out().await?;
    tracing::info!("Signed out");
    Ok(())
}
