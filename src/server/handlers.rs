//! Request routing and endpoint handlers
//!
//! # Endpoints
//!
//! * `GET /health` - Health check
//! * `GET /sso?spentityid=..&ReturnTo=..` - Start a login with the IdP auth source
//! * `GET /negotiate/retry?AuthState=..` - Re-enable negotiation and retry the login
//! * `GET /negotiate/backend?AuthState=..` - Continue with the fallback source
//! * `GET /negotiate/enable`, `GET /negotiate/disable` - Toggle Kerberos auto-login
//! * `GET /logout` - Log out through the source that authenticated the user

use super::views;
use super::AppState;
use crate::auth::{
    AuthContext, AuthError, AuthSource, AuthState, Challenge, LogoutState, Outcome,
    RequestContext, SpMetadata,
};
use crate::metrics;
use crate::negotiate::eligibility::DISABLE_COOKIE;
use crate::negotiate::{fall_back, STAGE_ID};
use crate::session::{set_negotiation_disabled, ATTRIBUTES_KEY, LOGOUT_STATE_KEY};
use cookie::Cookie;
use hyper::header::{
    HeaderValue, CACHE_CONTROL, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE, WWW_AUTHENTICATE,
};
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use time::macros::datetime;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Query parameter carrying the saved state id.
pub const AUTH_STATE_PARAM: &str = "AuthState";

/// Message of the 400 returned when `AuthState` is missing.
pub const MISSING_AUTH_STATE: &str = "Missing required AuthState query parameter.";

/// Handle one HTTP request. The request body is never read.
pub async fn handle_request<B>(
    req: Request<B>,
    app: &AppState,
    peer: Option<SocketAddr>,
) -> Response<String> {
    let (parts, _) = req.into_parts();
    let req = Request::from_parts(parts, ());

    let span = info_span!(
        "http.request",
        http.method = %req.method(),
        http.target = %req.uri().path(),
    );
    let started = Instant::now();
    let endpoint = endpoint_name(req.method(), req.uri().path());

    let response = route(&req, app, peer).instrument(span).await;

    metrics::record_request_duration(endpoint, started.elapsed().as_secs_f64());
    response
}

/// Metric label of the endpoint serving `path`.
fn endpoint_name(method: &Method, path: &str) -> &'static str {
    if method != Method::GET {
        return "method_not_allowed";
    }
    match path {
        "/health" => "health",
        "/sso" => "sso",
        "/negotiate/retry" => "retry",
        "/negotiate/backend" => "backend",
        "/negotiate/enable" => "enable",
        "/negotiate/disable" => "disable",
        "/logout" => "logout",
        _ => "not_found",
    }
}

async fn route(req: &Request<()>, app: &AppState, peer: Option<SocketAddr>) -> Response<String> {
    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    let query = parse_query(req.uri().query());
    let (request, new_session) = request_context(req, app, peer);

    let mut response = match req.uri().path() {
        "/health" => text(StatusCode::OK, "ok"),
        "/sso" => sso(app, &request, &query).await,
        "/negotiate/retry" => retry(app, &request, &query).await,
        "/negotiate/backend" => backend(app, &request, &query).await,
        "/negotiate/enable" => toggle(app, &request, false),
        "/negotiate/disable" => toggle(app, &request, true),
        "/logout" => logout(app, &request).await,
        path => {
            debug!(path, "No route");
            text(StatusCode::NOT_FOUND, "Not Found")
        }
    };

    if new_session {
        let name = app.config.server.session_cookie.as_str();
        let cookie = Cookie::build((name, request.session_id.as_str()))
            .path("/")
            .http_only(true)
            .build();
        append_cookie(&mut response, &cookie);
    }

    response
}

/// `GET /sso`
async fn sso(
    app: &AppState,
    request: &RequestContext,
    query: &HashMap<String, String>,
) -> Response<String> {
    let mut state = AuthState::new();

    if let Some(entity_id) = query.get("spentityid") {
        let options = app
            .config
            .service_providers
            .get(entity_id)
            .cloned()
            .unwrap_or_default();
        state = state.with_sp_metadata(SpMetadata {
            entity_id: entity_id.clone(),
            options,
        });
    }
    if let Some(return_to) = query.get("ReturnTo") {
        state = state.with_return_to(return_to.clone());
    }

    let Some(source) = app.registry.resolve(&app.config.idp.auth) else {
        error!(source = %app.config.idp.auth, "IdP auth source is not registered");
        return error_response(&AuthError::UnknownSource(app.config.idp.auth.clone()));
    };

    run_source(app, request, source.as_ref(), state).await
}

/// `GET /negotiate/retry`
async fn retry(
    app: &AppState,
    request: &RequestContext,
    query: &HashMap<String, String>,
) -> Response<String> {
    let Some(id) = query.get(AUTH_STATE_PARAM) else {
        return text(StatusCode::BAD_REQUEST, MISSING_AUTH_STATE);
    };

    let state = match app.states.load(id, STAGE_ID) {
        Ok(state) => state,
        Err(e) => return error_response(&e.into()),
    };

    let auth_id = &app.config.idp.auth;
    let Some(source) = app.registry.resolve(auth_id) else {
        return text(
            StatusCode::BAD_REQUEST,
            &format!("Invalid AuthId \"{}\" - not found.", auth_id),
        );
    };

    set_negotiation_disabled(app.sessions.as_ref(), &request.session_id, false);
    debug!("Session enabled, retrying");

    run_source(app, request, source.as_ref(), state).await
}

/// `GET /negotiate/backend`
async fn backend(
    app: &AppState,
    request: &RequestContext,
    query: &HashMap<String, String>,
) -> Response<String> {
    let Some(id) = query.get(AUTH_STATE_PARAM) else {
        return text(StatusCode::BAD_REQUEST, MISSING_AUTH_STATE);
    };

    let mut state = match app.states.load(id, STAGE_ID) {
        Ok(state) => state,
        Err(e) => return error_response(&e.into()),
    };
    debug!(backend = ?state.logout_state.backend, "Fallback requested");

    let ctx = auth_context(app, request);
    let outcome = fall_back(&ctx, &mut state).await;
    finish(app, request, &state, outcome)
}

/// `GET /negotiate/enable` and `GET /negotiate/disable`
fn toggle(app: &AppState, request: &RequestContext, disable: bool) -> Response<String> {
    set_negotiation_disabled(app.sessions.as_ref(), &request.session_id, disable);

    let mut cookie = Cookie::build((DISABLE_COOKIE, "true"))
        .path("/")
        .secure(true)
        .http_only(true)
        .expires(datetime!(2038-01-01 0:00 UTC))
        .build();
    if !disable {
        cookie.make_removal();
    }

    let base = app.config.server.base_url.trim_end_matches('/');
    let body = if disable {
        info!("Kerberos auto-login disabled");
        views::disabled(&format!("{}/negotiate/enable", base))
    } else {
        info!("Kerberos auto-login enabled");
        views::enabled(&format!("{}/negotiate/disable", base))
    };

    let mut response = html(StatusCode::OK, body);
    append_cookie(&mut response, &cookie);
    response
}

/// `GET /logout`
async fn logout(app: &AppState, request: &RequestContext) -> Response<String> {
    let logout_state: LogoutState = app
        .sessions
        .get(&request.session_id, LOGOUT_STATE_KEY)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    let Some(source) = app.registry.resolve(&app.config.idp.auth) else {
        return error_response(&AuthError::UnknownSource(app.config.idp.auth.clone()));
    };

    let ctx = auth_context(app, request);
    if let Err(e) = source.logout(&ctx, &logout_state).await {
        return error_response(&e);
    }

    app.sessions.expire(&request.session_id, LOGOUT_STATE_KEY);
    app.sessions.expire(&request.session_id, ATTRIBUTES_KEY);
    info!(backend = ?logout_state.backend, "Logged out");
    html(StatusCode::OK, views::logged_out())
}

async fn run_source(
    app: &AppState,
    request: &RequestContext,
    source: &dyn AuthSource,
    mut state: AuthState,
) -> Response<String> {
    let ctx = auth_context(app, request);
    let outcome = source.authenticate(&ctx, &mut state).await;
    finish(app, request, &state, outcome)
}

/// Turn the result of a source into the HTTP response.
fn finish(
    app: &AppState,
    request: &RequestContext,
    state: &AuthState,
    outcome: Result<Outcome, AuthError>,
) -> Response<String> {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => return error_response(&e),
    };

    match outcome.terminal() {
        Outcome::Completed(attributes) => {
            let ttl = Some(Duration::from_secs(app.config.server.session_ttl_seconds));
            let session = &request.session_id;
            match (
                serde_json::to_value(&state.logout_state),
                serde_json::to_value(attributes),
            ) {
                (Ok(logout_state), Ok(attributes)) => {
                    app.sessions.set(session, LOGOUT_STATE_KEY, logout_state, ttl);
                    app.sessions.set(session, ATTRIBUTES_KEY, attributes, ttl);
                }
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to store login in session");
                    return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store login");
                }
            }
            info!(backend = ?state.logout_state.backend, "Login completed");

            match state.return_to.as_deref() {
                Some(url) => redirect(url),
                None => json(StatusCode::OK, attributes),
            }
        }
        Outcome::Challenged(Challenge::Negotiate { state_id }) => {
            negotiate_challenge(&app.config.server.base_url, state_id)
        }
        Outcome::Challenged(Challenge::Basic { realm }) => {
            let mut response = text(StatusCode::UNAUTHORIZED, "Authentication required");
            let challenge = format!("Basic realm=\"{}\"", realm.replace('"', ""));
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response.headers_mut().insert(WWW_AUTHENTICATE, value);
            }
            response
        }
        Outcome::Delegated { .. } => {
            error!("Delegation chain without a terminal outcome");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// 401 with `WWW-Authenticate: Negotiate`
pub fn negotiate_challenge(base_url: &str, state_id: &str) -> Response<String> {
    let base = base_url.trim_end_matches('/');
    let id = utf8_percent_encode(state_id, NON_ALPHANUMERIC);
    let backend_url = format!("{}/negotiate/backend?{}={}", base, AUTH_STATE_PARAM, id);
    let retry_url = format!("{}/negotiate/retry?{}={}", base, AUTH_STATE_PARAM, id);

    let mut response = html(
        StatusCode::UNAUTHORIZED,
        views::negotiate_challenge(&backend_url, &retry_url),
    );
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Negotiate"));
    response
}

fn error_response(e: &AuthError) -> Response<String> {
    let status = e.status();
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    } else {
        warn!(error = %e, "Request rejected");
    }
    metrics::record_error(e.kind().unwrap_or("other"));
    text(status, &e.to_string())
}

fn auth_context<'a>(app: &'a AppState, request: &'a RequestContext) -> AuthContext<'a> {
    AuthContext {
        request,
        registry: &app.registry,
        sessions: app.sessions.as_ref(),
        states: app.states.as_ref(),
    }
}

/// Build the per-request context; the flag tells whether a new session id
/// was issued.
fn request_context(
    req: &Request<()>,
    app: &AppState,
    peer: Option<SocketAddr>,
) -> (RequestContext, bool) {
    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }

    let mut cookies = HashMap::new();
    for header in req.headers().get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(header).flatten() {
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }
    }

    let (session_id, new_session) = match cookies.get(&app.config.server.session_cookie) {
        Some(id) if !id.is_empty() => (id.clone(), false),
        _ => (uuid::Uuid::new_v4().to_string(), true),
    };

    let request = RequestContext {
        headers,
        cookies,
        client_ip: peer.map(|addr| addr.ip()),
        session_id,
    };
    (request, new_session)
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn append_cookie(response: &mut Response<String>, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!(cookie = cookie.name(), error = %e, "Cookie is not a valid header"),
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn text(status: StatusCode, body: &str) -> Response<String> {
    respond(status, "text/plain; charset=utf-8", body.to_string())
}

fn html(status: StatusCode, body: String) -> Response<String> {
    respond(status, "text/html; charset=utf-8", body)
}

fn json<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<String> {
    match serde_json::to_string(body) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn redirect(location: &str) -> Response<String> {
    let mut response = text(StatusCode::SEE_OTHER, "");
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => text(StatusCode::BAD_REQUEST, "Invalid ReturnTo URL"),
    }
}
