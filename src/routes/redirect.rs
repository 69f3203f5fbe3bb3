use std::time::Duration;

use axum::{
    extract::{
        FromRequest, FromRequestParts, Json, Query, Request, State, rejection::QueryRejection,
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, request::Parts},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::{admission::CallContext, error::ApiError, state::AppState};

/// Optional per-call deadline supplied by the caller, in milliseconds
pub const REQUEST_TIMEOUT_HEADER: HeaderName = HeaderName::from_static("x-request-timeout-ms");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Deserialize)]
pub struct RedirectRequest {
    pub video: String,
}

#[derive(Serialize)]
pub struct RedirectResponse {
    pub target_url: String,
}

/// Video URL taken from a JSON body or the `video` query parameter
pub struct VideoParam(String);

/// Call context built from the request headers
pub struct CallDeadline(CallContext);

/// `POST /redirect` with `{"video": "..."}`, answered with the target URL as JSON.
pub async fn redirect_json(
    State(state): State<AppState>,
    CallDeadline(ctx): CallDeadline,
    VideoParam(video): VideoParam,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = Uuid::now_v7();
    let outcome = state
        .engine
        .redirect(&video, ctx)
        .instrument(tracing::info_span!("redirect", %request_id, method = "POST"))
        .await?;

    let mut headers = HeaderMap::with_capacity(1);
    headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(&request_id.to_string())?,
    );

    let body = Json(RedirectResponse {
        target_url: outcome.target_url,
    });

    Ok((StatusCode::OK, headers, body))
}

/// `GET /redirect?video=...`, answered with a 302 to the target URL.
pub async fn redirect_location(
    State(state): State<AppState>,
    CallDeadline(ctx): CallDeadline,
    query: Result<Query<RedirectRequest>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let video = validate_video(&query.video)?;
    let request_id = Uuid::now_v7();
    let outcome = state
        .engine
        .redirect(video, ctx)
        .instrument(tracing::info_span!("redirect", %request_id, method = "GET"))
        .await?;

    let mut headers = HeaderMap::with_capacity(2);
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&outcome.target_url)?,
    );
    headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(&request_id.to_string())?,
    );

    Ok((StatusCode::FOUND, headers))
}

impl<S> FromRequest<S> for VideoParam
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<RedirectRequest>::from_request(req, state).await?;
        let video = validate_video(&body.video)?;
        Ok(VideoParam(video.to_owned()))
    }
}

impl<S> FromRequestParts<S> for CallDeadline
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(&REQUEST_TIMEOUT_HEADER) else {
            return Ok(CallDeadline(CallContext::new()));
        };

        let millis = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .ok_or(ApiError::BadRequest(
                "x-request-timeout-ms must be a positive integer",
            ))?;

        Ok(CallDeadline(
            CallContext::new().with_timeout(Duration::from_millis(millis)),
        ))
    }
}

fn validate_video(video: &str) -> Result<&str, ApiError> {
    let video = video.trim();
    if video.is_empty() {
        return Err(ApiError::BadRequest("Video URL must not be empty"));
    }
    Ok(video)
}
