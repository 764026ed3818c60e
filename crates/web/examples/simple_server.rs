use atrium_web::{Config, Server, StatusError, middleware_fn, view_fn};
use http::StatusCode;
use serde_json::json;
use std::time::Duration;

// Graceful server: ctrl-c waits up to 10s for in-flight requests.
//
// curl -v http://127.0.0.1:8000/jsonPage
// curl -v http://127.0.0.1:8000/slow
#[tokio::main]
async fn main() {
    let config = Config {
        host: "127.0.0.1".to_owned(),
        port: 8000,
        compress: true,
        graceful_shutdown: true,
        shutdown_timeout: Some(Duration::from_secs(10)),
        ..Config::default()
    };

    let server = Server::builder()
        .config(config)
        .use_before(middleware_fn(|_ctx| Box::pin(async { Ok(()) })))
        .use_after(middleware_fn(|ctx| {
            Box::pin(async move {
                // comment this out to get the view responses back
                if ctx.path() == "/" {
                    return Err(StatusError::new(StatusCode::BAD_REQUEST, "Error example"));
                }
                Ok(())
            })
        }))
        .path("GET", "/", view_fn(|ctx| Box::pin(async move { ctx.html_response("<h1>Atrium</h1>") })))
        .timeout_path(
            "GET",
            "/jsonPage",
            view_fn(|ctx| Box::pin(async move { ctx.json_response(&json!({ "atrium": true })) })),
            Duration::from_secs(5),
            "Timeout response message",
        )
        .timeout_with_code_path(
            "GET",
            "/slow",
            view_fn(|ctx| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    ctx.text_response("too late to be seen")
                })
            }),
            Duration::from_secs(1),
            "the upstream took too long",
            StatusCode::GATEWAY_TIMEOUT,
        )
        .static_dir("/static", ".")
        .panic_handler(|ctx, message| ctx.error(format!("recovered from: {message}"), StatusCode::INTERNAL_SERVER_ERROR))
        .build()
        .unwrap();

    if let Err(e) = server.listen_and_serve().await {
        eprintln!("server error: {e}");
    }
}
