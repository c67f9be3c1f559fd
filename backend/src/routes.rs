use actix_multipart::Multipart;
use actix_web::{web, Error, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;
use shared::{FeedbackRequest, IdentificationRequest, ImageSource};

use crate::auth::middleware::AuthMiddleware;
use crate::auth::models::AuthenticatedUser;
use crate::pipeline::error::{FailureKind, PipelineError};
use crate::pipeline::orchestrator::Identifier;
use crate::quality::analyze_quality;
use crate::results::result_service::ResultServiceError;
use crate::storage::s3_service::validate_image_size;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/api")
                .wrap(auth_middleware)
                .service(web::resource("/quality").route(web::post().to(check_quality)))
                .service(web::resource("/identify").route(web::post().to(identify)))
                .service(web::resource("/results/{result_id}").route(web::get().to(get_result)))
                .service(
                    web::resource("/results/{result_id}/feedback")
                        .route(web::post().to(submit_feedback)),
                ),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

#[derive(Default)]
struct IdentifyForm {
    crop_id: String,
    crop_name: String,
    image: Vec<u8>,
}

async fn read_form(mut payload: Multipart) -> Result<IdentifyForm, Error> {
    let mut form = IdentifyForm::default();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            data.extend_from_slice(&chunk?);
            if validate_image_size(data.len() as u64).is_err() {
                return Err(actix_web::error::ErrorPayloadTooLarge("Image exceeds 50MB"));
            }
        }

        match name.as_str() {
            "crop_id" => form.crop_id = String::from_utf8_lossy(&data).trim().to_string(),
            "crop_name" => form.crop_name = String::from_utf8_lossy(&data).trim().to_string(),
            "image" => form.image = data,
            other => log::debug!("Ignoring multipart field '{}'", other),
        }
    }
    Ok(form)
}

async fn check_quality(_user: AuthenticatedUser, payload: Multipart) -> Result<HttpResponse, Error> {
    let form = read_form(payload).await?;
    if form.image.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::new("No image provided")));
    }

    let quality = analyze_quality(form.image).await;
    info!(
        "Quality check: acceptable={} focus={:.3} brightness={:.3}",
        quality.is_acceptable, quality.focus_score, quality.brightness
    );
    Ok(HttpResponse::Ok().json(quality))
}

async fn identify(
    user: AuthenticatedUser,
    identifier: web::Data<Identifier>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let form = read_form(payload).await?;
    let request = IdentificationRequest {
        crop_id: form.crop_id,
        crop_name: form.crop_name,
        image: (!form.image.is_empty()).then(|| ImageSource::Bytes(form.image)),
    };

    match identifier.identify(request, &user.user_id).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e @ (PipelineError::MissingCrop | PipelineError::MissingImage)) => {
            Ok(HttpResponse::BadRequest().json(ErrorResponse::new(e.user_message())))
        }
        Err(e) => {
            error!("Identification for {} ended without a result ({}): {}", user.user_id, e.kind(), e);
            let mut status = if e.kind() == FailureKind::Cancelled {
                HttpResponse::ServiceUnavailable()
            } else {
                HttpResponse::InternalServerError()
            };
            Ok(status.json(ErrorResponse::new(e.user_message())))
        }
    }
}

async fn get_result(
    user: AuthenticatedUser,
    identifier: web::Data<Identifier>,
    path: web::Path<String>,
) -> HttpResponse {
    let result_id = path.into_inner();
    match identifier.results().get_result(&result_id).await {
        Ok(Some(result)) if result.user_id == user.user_id => HttpResponse::Ok().json(result),
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse::new("Result not found")),
        Err(e) => {
            error!("Error retrieving result {}: {}", result_id, e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to load result"))
        }
    }
}

async fn submit_feedback(
    user: AuthenticatedUser,
    identifier: web::Data<Identifier>,
    path: web::Path<String>,
    body: web::Json<FeedbackRequest>,
) -> HttpResponse {
    let result_id = path.into_inner();
    let feedback = body.into_inner();
    match identifier
        .results()
        .submit_feedback(
            &result_id,
            &user.user_id,
            feedback.rating,
            &feedback.comment,
            feedback.is_accurate,
        )
        .await
    {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(e @ (ResultServiceError::InvalidRating(_) | ResultServiceError::MissingResultId)) => {
            HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string()))
        }
        Err(ResultServiceError::NotFound(_)) => {
            HttpResponse::NotFound().json(ErrorResponse::new("Result not found"))
        }
        Err(e) => {
            error!("Feedback for {} failed: {}", result_id, e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Failed to record feedback"))
        }
    }
}
