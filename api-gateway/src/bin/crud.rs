//! CRUD Lambda - routes API Gateway requests to DynamoDB actions.
//!
//! The route schema comes from `ROUTES_FILE` / `ROUTES_JSON`; every request is
//! matched against it and executed by the action processor.

use common::http::{error_response, merge_input, reply_response};
use common::{caller_from_request, Config, DynamoStore, Service};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    service: Service<DynamoStore>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let store = DynamoStore::from_env(&config.aws_region, config.dynamodb_endpoint.as_deref()).await;
        let service = Service::from_config(&config, Arc::new(store))?;

        info!(
            routes = service.router().routes().len(),
            region = %config.aws_region,
            "Loaded route schema"
        );
        Ok(Self { service })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str().to_string();
    let path = event.uri().path().to_string();

    info!("Received request: method={}, path={}", method, path);

    let query = event.query_string_parameters();
    let input = match merge_input(query.iter(), event.body()) {
        Ok(input) => input,
        Err(errors) => return error_response(&errors),
    };
    let owner = caller_from_request(&event).map(|user| user.user_id);

    let reply = state
        .service
        .handle(&method, &path, input, owner.as_deref())
        .await;

    info!(status = reply.status, "Completed request: method={}, path={}", method, path);
    reply_response(&reply)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
