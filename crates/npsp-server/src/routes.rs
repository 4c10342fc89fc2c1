//! HTTP handlers.
//!
//! Store work is synchronous, so every handler runs it on the blocking pool under the
//! configured request timeout.

use std::time::Instant;

use axum::{
    extract::{FromRequest, Path, Query, State},
    http::StatusCode,
    Json,
};
use npsp_core::{
    CompletionView, EnrollmentRequest, FormKind, FormSubmission, NpspCore, NpspError, NpspResult,
    Registration, Researcher, Site, Subject,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::ApiError;
use super::state::AppState;

/// JSON body extractor that reports malformed payloads as validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

type ApiResult<T> = Result<T, ApiError>;

/// Run store work off the async runtime, bounded by the request timeout.
///
/// On timeout the response is sent immediately; the blocking call itself runs to
/// completion or rollback in the background. Enrollment is the one write that is not
/// safe to repeat, so it carries the same deadline into its transaction.
async fn blocking<T, F>(state: &AppState, work: F) -> ApiResult<T>
where
    F: FnOnce(&NpspCore) -> NpspResult<T> + Send + 'static,
    T: Send + 'static,
{
    let core = state.core.clone();
    let limit = state.config.request_timeout;
    let task = tokio::task::spawn_blocking(move || work(&core));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(join_error)) => {
            Err(NpspError::Persistence(format!("store worker failed: {}", join_error)).into())
        }
        Err(_) => Err(NpspError::Timeout(format!(
            "request exceeded {} ms",
            limit.as_millis()
        ))
        .into()),
    }
}

fn parse_form(form: &str) -> ApiResult<FormKind> {
    form.parse::<FormKind>()
        .map_err(|reason| NpspError::Validation(reason).into())
}

// =========================================================================
// Health
// =========================================================================

#[derive(Serialize)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

pub async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "NPSP API is alive".into(),
    })
}

// =========================================================================
// Enrollment and Completion
// =========================================================================

pub async fn enroll(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<EnrollmentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let deadline = Instant::now() + state.config.request_timeout;
    let records = blocking(&state, move |core| core.enroll_before(&request, deadline)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "records": records }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormProgressReq {
    pub subject_id: String,
    pub stage_name: String,
}

pub async fn form_progress(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<FormProgressReq>,
) -> ApiResult<Json<Value>> {
    let stage = req.stage_name.clone();
    let completion =
        blocking(&state, move |core| core.mark_complete(&req.subject_id, &req.stage_name)).await?;
    Ok(Json(json!({
        "message": format!("Stage '{}' marked completed", stage),
        "formCompletion": completion,
    })))
}

pub async fn get_form_completion(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> ApiResult<Json<CompletionView>> {
    let view = blocking(&state, move |core| core.get_completion(&subject_id)).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct SubjectsQuery {
    pub site: Option<String>,
}

pub async fn list_subjects(
    State(state): State<AppState>,
    Query(query): Query<SubjectsQuery>,
) -> ApiResult<Json<Value>> {
    let site = query
        .site
        .map(|name| name.parse::<Site>())
        .transpose()
        .map_err(|e| NpspError::Validation(e.to_string()))?;

    let subjects = blocking(&state, move |core| match site {
        Some(site) => core.list_subjects_by_site(site),
        None => core.list_subjects(),
    })
    .await?;
    Ok(Json(json!({ "subjects": subjects })))
}

pub async fn get_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> ApiResult<Json<Subject>> {
    let subject = blocking(&state, move |core| core.get_subject(&subject_id)).await?;
    Ok(Json(subject))
}

// =========================================================================
// Form Data
// =========================================================================

pub async fn update_form(
    State(state): State<AppState>,
    Path(form): Path<String>,
    ApiJson(submission): ApiJson<FormSubmission>,
) -> ApiResult<Json<Value>> {
    let form = parse_form(&form)?;
    let subject_id = submission.subject_id.clone();
    blocking(&state, move |core| {
        core.update_form(form, &submission.subject_id, &submission.fields)
    })
    .await?;
    Ok(Json(json!({
        "message": format!("Form '{}' updated for {}", form, subject_id)
    })))
}

pub async fn update_form_batch(
    State(state): State<AppState>,
    Path(form): Path<String>,
    ApiJson(entries): ApiJson<Vec<FormSubmission>>,
) -> ApiResult<Json<Value>> {
    let form = parse_form(&form)?;
    let updated = blocking(&state, move |core| core.update_form_batch(form, &entries)).await?;
    Ok(Json(json!({
        "message": format!("Form '{}' updated", form),
        "updated": updated,
    })))
}

pub async fn get_form(
    State(state): State<AppState>,
    Path((form, subject_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let form = parse_form(&form)?;
    let data = blocking(&state, move |core| core.get_form(form, &subject_id)).await?;
    Ok(Json(json!({ "formData": data })))
}

// =========================================================================
// Researchers
// =========================================================================

pub async fn register(
    State(state): State<AppState>,
    ApiJson(registration): ApiJson<Registration>,
) -> ApiResult<(StatusCode, Json<Researcher>)> {
    let researcher = blocking(&state, move |core| core.register(&registration)).await?;
    Ok((StatusCode::CREATED, Json(researcher)))
}

#[derive(Debug, Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginReq>,
) -> ApiResult<Json<Value>> {
    let researcher = blocking(&state, move |core| core.login(&req.email, &req.password)).await?;
    Ok(Json(json!({
        "message": "Login successful",
        "researcher": researcher,
    })))
}

pub async fn next_serial(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let next = blocking(&state, |core| core.next_serial_number()).await?;
    Ok(Json(json!({ "nextSerialNumber": next })))
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

pub async fn get_researcher(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<Researcher>> {
    let researcher = blocking(&state, move |core| core.get_researcher(&query.email)).await?;
    Ok(Json(researcher))
}

pub async fn list_researchers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let researchers = blocking(&state, |core| core.list_researchers()).await?;
    Ok(Json(json!({ "researchers": researchers })))
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateReq {
    pub email: String,
    pub fields: Map<String, Value>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ProfileUpdateReq>,
) -> ApiResult<Json<Researcher>> {
    let researcher =
        blocking(&state, move |core| core.update_profile(&req.email, &req.fields)).await?;
    Ok(Json(researcher))
}
