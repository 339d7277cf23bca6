//! `gdrv auth ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_auth::AuthOptions;
use gdrv_core::{AppResult, ErrorKind};

use super::{optional, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("auth", "");
    };
    let name = format!("auth.{verb}");
    let result = match verb {
        "login" => login(cx, sub).await,
        "device" => device(cx, sub).await,
        "service-account" => service_account(cx, sub).await,
        "logout" => logout(cx).await,
        "status" => status(cx).await,
        "profiles" => profiles(cx),
        "diagnose" => diagnose(cx),
        other => return unknown("auth", other),
    };
    (name, result)
}

fn scope_opts(matches: &ArgMatches) -> AuthOptions {
    AuthOptions {
        scopes: matches
            .get_many::<String>("scopes")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        no_browser: matches
            .try_get_one::<bool>("no-browser")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false),
    }
}

async fn login(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    let opts = scope_opts(matches);
    let profile = cx.globals.profile.clone();
    let cancel = cx.cancel.clone();
    let credential = manager
        .authenticate(&profile, !opts.no_browser, &opts, &cancel)
        .await?;
    Ok(json!({
        "authenticated": true,
        "profile": profile,
        "storageBackend": manager.backend_name(),
        "expiry": rfc3339(credential.expiry),
        "scopes": credential.scopes,
    }))
}

async fn device(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    let opts = scope_opts(matches);
    let profile = cx.globals.profile.clone();
    let (device, scopes) = manager.start_device_authorization(&opts).await?;
    eprintln!(
        "Visit {} and enter code {}",
        device.verification_url, device.user_code
    );
    let credential = manager
        .finish_device_authorization(&profile, &device, &scopes, &cx.cancel)
        .await?;
    Ok(json!({
        "authenticated": true,
        "profile": profile,
        "storageBackend": manager.backend_name(),
        "expiry": rfc3339(credential.expiry),
        "scopes": credential.scopes,
    }))
}

async fn service_account(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    let opts = scope_opts(matches);
    let key_path = std::path::PathBuf::from(required(matches, "key-file")?);
    let subject = optional(matches, "subject");
    let profile = cx.globals.profile.clone();
    let credential = manager
        .login_service_account(&profile, &key_path, &opts, subject)
        .await?;
    Ok(json!({
        "authenticated": true,
        "profile": profile,
        "credentialType": credential.credential_type.label(),
        "serviceAccount": credential.service_account_email,
        "subject": credential.impersonated_subject,
        "expiry": rfc3339(credential.expiry),
    }))
}

async fn logout(cx: &mut CommandContext) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    let removed = manager.logout(&cx.globals.profile)?;
    Ok(json!({ "profile": cx.globals.profile, "removed": removed }))
}

async fn status(cx: &mut CommandContext) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    match manager.load_credentials(&cx.globals.profile) {
        Ok(credential) => Ok(json!({
            "authenticated": true,
            "profile": cx.globals.profile,
            "storageBackend": manager.backend_name(),
            "credentialType": credential.credential_type.label(),
            "expiry": rfc3339(credential.expiry),
            "expired": credential.is_expired(time::OffsetDateTime::now_utc()),
            "scopes": credential.scopes,
        })),
        Err(error) if error.kind() == ErrorKind::AuthRequired => Ok(json!({
            "authenticated": false,
            "profile": cx.globals.profile,
            "storageBackend": manager.backend_name(),
            "reason": error.message(),
        })),
        Err(error) => Err(error),
    }
}

fn profiles(cx: &mut CommandContext) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    let profiles = manager.profiles()?;
    Ok(json!({ "profiles": profiles }))
}

fn diagnose(cx: &mut CommandContext) -> AppResult<Value> {
    let manager = cx.auth_manager()?;
    let report = manager.diagnose()?;
    Ok(serde_json::to_value(report)?)
}

fn rfc3339(instant: time::OffsetDateTime) -> String {
    instant
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
