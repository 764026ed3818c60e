use atrium_web::{Config, Filters, RequestContext, Server, StatusError, middleware_fn, view_fn};
use http::HeaderValue;
use http::header::HeaderName;
use tracing::info;

fn stamp(ctx: &mut RequestContext, name: &'static str) {
    ctx.set_header(HeaderName::from_static(name), HeaderValue::from_static("1"));
}

// curl -v http://127.0.0.1:8000/
// curl -v -H 'x-api-key: secret' http://127.0.0.1:8000/
#[tokio::main]
async fn main() {
    let config = Config { host: "127.0.0.1".to_owned(), port: 8000, ..Config::default() };

    let filters = Filters::new()
        .before(middleware_fn(|ctx| {
            Box::pin(async move {
                if ctx.header("x-api-key") != Some("secret") {
                    return Err(StatusError::unauthorized("missing or wrong x-api-key"));
                }
                stamp(ctx, "x-before-filter");
                Ok(())
            })
        }))
        .after(middleware_fn(|ctx| {
            Box::pin(async move {
                stamp(ctx, "x-after-filter");
                Ok(())
            })
        }));

    let server = Server::builder()
        .config(config)
        .use_before(middleware_fn(|ctx| {
            Box::pin(async move {
                info!(method = %ctx.method(), path = ctx.path(), "incoming request");
                stamp(ctx, "x-before-global");
                Ok(())
            })
        }))
        .use_after(middleware_fn(|ctx| {
            Box::pin(async move {
                info!(status = ctx.status().as_u16(), "response ready");
                Ok(())
            })
        }))
        .path_with_filters(
            "GET",
            "/",
            view_fn(|ctx| Box::pin(async move { ctx.text_response("Middlewares and view filters") })),
            filters,
        )
        .group("/admin", |admin| {
            admin
                .use_before(middleware_fn(|_ctx| Box::pin(async { Err(StatusError::forbidden("admins only")) })))
                .path("GET", "/panel", view_fn(|ctx| Box::pin(async move { ctx.text_response("panel") })))
        })
        .build()
        .unwrap();

    if let Err(e) = server.listen_and_serve().await {
        eprintln!("server error: {e}");
    }
}
