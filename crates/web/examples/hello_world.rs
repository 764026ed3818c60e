use atrium_web::{Config, Server, view_fn};

#[tokio::main]
async fn main() {
    let config = Config { host: "127.0.0.1".to_owned(), port: 8000, ..Config::default() };

    let server = Server::builder()
        .config(config)
        .path("GET", "/", view_fn(|ctx| Box::pin(async move { ctx.text_response("Hello World") })))
        .path(
            "GET",
            "/hello/{name}",
            view_fn(|ctx| {
                Box::pin(async move {
                    let name = ctx.path_param("name").unwrap_or("stranger").to_owned();
                    ctx.text_response(format!("Hello {name}"))
                })
            }),
        )
        .build()
        .unwrap();

    if let Err(e) = server.listen_and_serve().await {
        eprintln!("server error: {e}");
    }
}
