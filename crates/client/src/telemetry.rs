//! Sentry scope helpers shared by the flows.

use packup_core::Session;

/// Associate subsequent Sentry events with the signed-in user.
pub fn set_sentry_user(session: &Session) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(session.identity_id.to_string()),
            email: session.email.as_ref().map(ToString::to_string),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Called when the session goes away so later errors are not attributed to
/// the previous user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a user-visible step.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("auth", "Sign-in link requested", Some(&[("domain", "example.com")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
