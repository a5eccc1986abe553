use axum::extract::{FromRequest, FromRequestParts, Multipart, Request};
use axum::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use axum::http::request::Parts;
use axum::Json;
use planner_api::{extract_token_from_cookie, extract_token_from_header, Upload};
use planner_core::{OwnerId, PlannerError};
use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::ServiceState;

/// The authenticated caller. Rejects with 401 before any handler touches the store.
#[derive(Debug, Clone)]
pub struct Caller(pub OwnerId);

#[axum::async_trait]
impl FromRequestParts<ServiceState> for Caller {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let header = |name: HeaderName| parts.headers.get(name).and_then(|value| value.to_str().ok());
        let token = header(AUTHORIZATION)
            .and_then(extract_token_from_header)
            .or_else(|| header(COOKIE).and_then(extract_token_from_cookie))
            .ok_or_else(|| PlannerError::Unauthenticated("missing token".to_string()))?;

        let owner_id = state.auth.authenticate(token)?;
        Ok(Self(owner_id))
    }
}

/// A create or update body: payload fields plus an optional uploaded image.
#[derive(Debug, Default)]
pub struct RecordBody {
    pub payload: Map<String, Value>,
    pub image: Option<Upload>,
}

#[axum::async_trait]
impl FromRequest<ServiceState> for RecordBody {
    type Rejection = ServiceError;

    async fn from_request(request: Request, state: &ServiceState) -> Result<Self, Self::Rejection> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(request, state)
                .await
                .map_err(|err| ServiceError::bad_request("body", err.body_text()))?;
            return read_multipart(multipart).await;
        }

        let Json(value) = Json::<Value>::from_request(request, state)
            .await
            .map_err(|err| ServiceError::bad_request("body", err.body_text()))?;
        match value {
            Value::Object(payload) => Ok(Self { payload, image: None }),
            _ => Err(ServiceError::bad_request("body", "expected a JSON object")),
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<RecordBody, ServiceError> {
    let mut body = RecordBody::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ServiceError::bad_request("body", format!("invalid multipart payload: {err}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "image" {
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ServiceError::bad_request("image", format!("unreadable upload: {err}")))?;
            // Browsers send an empty part when no file was chosen.
            if !bytes.is_empty() {
                body.image = Some(Upload { content_type, bytes: bytes.to_vec() });
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|err| ServiceError::bad_request(&name, format!("unreadable field: {err}")))?;
            body.payload.insert(name, Value::String(text));
        }
    }

    Ok(body)
}
