use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use cropdoc::auth::jwt::JwtService;
use cropdoc::auth::middleware::AuthMiddleware;
use cropdoc::config::ServerConfig;
use cropdoc::db::dynamodb_repository::DynamoDbRepository;
use cropdoc::inference::gemini::GeminiClient;
use cropdoc::pipeline::orchestrator::Identifier;
use cropdoc::rate_limit::RateLimiter;
use cropdoc::results::result_service::ResultService;
use cropdoc::routes::configure_routes;
use cropdoc::storage::s3_service::S3Service;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServerConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(e)
    })?;

    // Initialize AWS configuration
    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let s3_client = S3Client::new(&aws_config);

    let pipeline = config.pipeline.clone();
    let repository = DynamoDbRepository::new(dynamodb_client, config.results_table.clone());
    let results = ResultService::new(
        Arc::new(repository),
        pipeline.lookup_policy(),
        pipeline.lookup_policy(),
    );
    let s3_service = S3Service::new(s3_client, config.s3_bucket.clone());

    let gemini = GeminiClient::new(
        &config.gemini_base_url,
        &config.gemini_model,
        &config.gemini_api_key,
        std::time::Duration::from_secs(pipeline.ai.timeout_secs),
    )
    .map_err(|e| {
        log::error!("Failed to build AI client: {}", e);
        std::io::Error::other(e)
    })?;

    // One window shared by every request in the process.
    let rate_limiter = Arc::new(RateLimiter::new(pipeline.ai.max_requests_per_minute));
    log::info!(
        "AI model {} limited to {} requests/minute",
        config.gemini_model,
        rate_limiter.max_requests_per_minute()
    );

    let identifier = web::Data::new(Identifier::new(
        Arc::new(s3_service),
        Arc::new(gemini),
        results,
        rate_limiter,
        pipeline,
    ));
    let auth_middleware = AuthMiddleware::new(JwtService::new(&config.jwt_secret));

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(identifier.clone())
            .configure(|cfg| configure_routes(cfg, auth_middleware.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
