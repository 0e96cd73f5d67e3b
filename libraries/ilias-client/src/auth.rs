//! Login flows.
//!
//! Every request a flow sends waits on the shared [`RateGate`] like any other
//! request; logging in is not exempt from throttling.

use crate::parse;
use crate::rate_gate::RateGate;
use ilias_core::{AuthError, Credentials};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

/// How the installation authenticates its users.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LoginFlow {
    /// SAML via a Shibboleth identity provider
    Shibboleth {
        idp_selection: String,
        home_organization_selection: String,
    },
    /// The installation's own username/password form
    Form {
        #[serde(default = "default_login_path")]
        login_path: String,
    },
}

impl Default for LoginFlow {
    fn default() -> Self {
        Self::Shibboleth {
            idp_selection: "https://idp.scc.kit.edu/idp/shibboleth".to_string(),
            home_organization_selection: "Mit KIT-Account anmelden".to_string(),
        }
    }
}

fn default_login_path() -> String {
    "login.php".to_string()
}

impl LoginFlow {
    pub fn form() -> Self {
        Self::Form {
            login_path: default_login_path(),
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shibboleth { .. } => "shibboleth",
            Self::Form { .. } => "form",
        }
    }
}

/// Run `flow` on `http`, leaving the session cookies in its cookie store.
pub(crate) async fn login(
    http: &Client,
    base: &Url,
    flow: &LoginFlow,
    credentials: &Credentials,
    gate: &RateGate,
) -> Result<(), AuthError> {
    info!(flow = flow.name(), user = %credentials.username, "Logging in");
    match flow {
        LoginFlow::Shibboleth {
            idp_selection,
            home_organization_selection,
        } => shibboleth(http, base, idp_selection, home_organization_selection, credentials, gate).await,
        LoginFlow::Form { login_path } => form(http, base, login_path, credentials, gate).await,
    }?;
    info!(flow = flow.name(), "Logged in");
    Ok(())
}

async fn shibboleth(
    http: &Client,
    base: &Url,
    idp_selection: &str,
    home_organization_selection: &str,
    credentials: &Credentials,
    gate: &RateGate,
) -> Result<(), AuthError> {
    let target = join(base, "shib_login.php?target=")?;
    let _permit = gate.acquire().await;
    let establishment = checked(
        http.post(join(base, "Shibboleth.sso/Login")?)
            .form(&[
                ("sendLogin", "1"),
                ("idp_selection", idp_selection),
                ("target", target.as_str()),
                ("home_organization_selection", home_organization_selection),
            ])
            .send()
            .await,
    )?;
    let idp_url = establishment.url().clone();
    debug!(idp = %idp_url, "Session establishment redirected to identity provider");

    let _permit = gate.acquire().await;
    let login_page = checked(
        http.post(idp_url)
            .form(&[
                ("j_username", credentials.username.as_str()),
                ("j_password", credentials.password()),
                ("_eventId_proceed", ""),
            ])
            .send()
            .await,
    )?
    .text()
    .await
    .map_err(|e| AuthError::PlatformUnavailable(e.to_string()))?;

    let saml = parse::saml_form(&login_page)?;

    let _permit = gate.acquire().await;
    checked(
        http.post(join(base, "Shibboleth.sso/SAML2/POST")?)
            .form(&[
                ("SAMLResponse", saml.saml_response.as_str()),
                ("RelayState", saml.relay_state.as_str()),
            ])
            .send()
            .await,
    )?;
    Ok(())
}

async fn form(
    http: &Client,
    base: &Url,
    login_path: &str,
    credentials: &Credentials,
    gate: &RateGate,
) -> Result<(), AuthError> {
    let _permit = gate.acquire().await;
    let response = checked(
        http.post(join(base, login_path)?)
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password()),
                ("cmd[doStandardAuthentication]", "Anmelden"),
            ])
            .send()
            .await,
    )?;
    let landed = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::PlatformUnavailable(e.to_string()))?;

    if parse::is_login_url(&landed) || parse::page_error(&body).is_some() {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(())
}

fn join(base: &Url, path: &str) -> Result<Url, AuthError> {
    base.join(path)
        .map_err(|e| AuthError::UnexpectedResponseShape(format!("invalid login URL {}: {}", path, e)))
}

/// Map transport failures and bad statuses of a login step.
fn checked(response: reqwest::Result<Response>) -> Result<Response, AuthError> {
    let response = response.map_err(|e| AuthError::PlatformUnavailable(e.to_string()))?;
    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AuthError::PlatformUnavailable(format!(
            "{} answered {}",
            response.url(),
            status
        )));
    }
    if !status.is_success() {
        return Err(AuthError::UnexpectedResponseShape(format!(
            "{} answered {}",
            response.url(),
            status
        )));
    }
    Ok(response)
}
