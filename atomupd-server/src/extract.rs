use atomupd_image::Image;
use axum::{
    extract::{FromRequestParts, Query},
    http::{StatusCode, request::Parts},
};
use std::collections::HashMap;
use tracing::debug;

/// The image described by the query string of a request.
pub struct QueryImage(pub Image);

impl<S> FromRequestParts<S> for QueryImage
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let malformed = (StatusCode::BAD_REQUEST, "Malformed request");

        let Query(params) = Query::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|error| {
                debug!(error = %error, "Unreadable query string");
                malformed
            })?;

        match Image::from_query(&params) {
            Ok(image) => Ok(QueryImage(image)),
            Err(error) => {
                debug!(error = %error, params = ?params, "Malformed request");
                Err(malformed)
            }
        }
    }
}
