use actix_files::Files;
use actix_utils::future::{ready, Ready};
use actix_web::{
    dev::{self, ServiceResponse},
    error,
    http::{header::ContentType, StatusCode},
    middleware::{Compress, ErrorHandlerResponse, ErrorHandlers, Logger},
    route,
    web::{Data, Query},
    App, FromRequest, HttpRequest, HttpResponse, HttpServer, Responder, Result,
};
use actix_web_lab::respond::Html;
use crypto_events_hub::events::{templating, Events};
use crypto_events_hub::{AppConfig, SiteConfig};
use dotenv::dotenv;
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;

struct MiniJinjaRenderer {
    tmpl_env: Data<AutoReloader>,
}

impl MiniJinjaRenderer {
    fn render(&self, tmpl: &str, ctx: impl Into<minijinja::value::Value>) -> Result<Html> {
        self.tmpl_env
            .acquire_env()
            .map_err(|_| error::ErrorInternalServerError("could not acquire template env"))?
            .get_template(tmpl)
            .map_err(|_| error::ErrorInternalServerError("could not find template"))?
            .render(ctx.into())
            .map(Html)
            .map_err(|err| {
                log::error!("{err}");
                error::ErrorInternalServerError("template error")
            })
    }
}

impl FromRequest for MiniJinjaRenderer {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut dev::Payload) -> Self::Future {
        let tmpl_env = <Data<AutoReloader>>::extract(req).into_inner();

        ready(tmpl_env.map(|tmpl_env| Self { tmpl_env }))
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    /// Search term.
    q: Option<String>,
    category: Option<String>,
}

#[route("/", method = "GET", method = "HEAD")]
async fn index(
    tmpl_env: MiniJinjaRenderer,
    events: Data<Events>,
    site: Data<SiteConfig>,
    query: Query<SearchQuery>,
) -> Result<impl Responder> {
    let filter = events.filter(query.q.as_deref(), query.category.as_deref());
    let view = events.view(&filter).await;

    let loading = view.loading();
    let fallback = view
        .origin
        .and_then(|origin| origin.fallback_reason())
        .map(|reason| reason.as_str().to_owned());

    tmpl_env.render(
        "index.html",
        minijinja::context! {
            site => site.get_ref(),
            events => templating::to_values(view.events),
            categories => view.categories,
            search_term => filter.term,
            category => filter.category,
            loading => loading,
            fallback => fallback,
        },
    )
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load()?;
    let server = config.server.clone();

    let events = Events::from_config(&config.events)?;
    let load_task = events.spawn_load_task();

    if server.template_autoreload {
        log::info!("template auto-reloading is enabled");
    } else {
        log::info!(
            "template auto-reloading is disabled; run with CEH_SERVER__TEMPLATE_AUTORELOAD=true to enable"
        );
    }

    let template_dir = server.template_dir.clone();
    let template_autoreload = server.template_autoreload;

    // The closure is invoked every time the environment is outdated to recreate it.
    let tmpl_reloader = AutoReloader::new(move |notifier| {
        let mut env: minijinja::Environment<'static> = minijinja::Environment::new();

        // if watch_path is never called, no fs watcher is created
        if template_autoreload {
            notifier.watch_path(&template_dir, true);
        }

        env.set_source(minijinja::Source::from_path(&template_dir));

        Ok(env)
    });

    let tmpl_reloader = Data::new(tmpl_reloader);
    let events = Data::new(events);
    let site = Data::new(config.site);
    let static_dir = server.static_dir.clone();

    log::info!("starting HTTP server at {}", server.listen_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(events.clone())
            .app_data(site.clone())
            .app_data(tmpl_reloader.clone())
            .service(index)
            .service(Files::new("/static", &static_dir))
            .wrap(
                ErrorHandlers::new()
                    .handler(StatusCode::NOT_FOUND, not_found)
                    .handler(StatusCode::INTERNAL_SERVER_ERROR, internal_server_error),
            )
            .wrap(Compress::default())
            // Don't log things that could identify the user, e.g. omit client IP, referrer and
            // user agent.
            .wrap(Logger::new(r#""%r" %s %b %T"#))
    })
    .workers(2)
    .bind(server.listen_addr)?
    .run()
    .await?;

    load_task.stop().await?;

    Ok(())
}

/// Error handler for a 404 Page not found error.
fn not_found<B>(svc_res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
    error_handler(svc_res, "not_found.html")
}

/// Error handler for a 500 Internal server error.
fn internal_server_error<B>(svc_res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
    error_handler(svc_res, "error.html")
}

/// Generic error handler.
fn error_handler<B>(svc_res: ServiceResponse<B>, tmpl: &str) -> Result<ErrorHandlerResponse<B>> {
    let req = svc_res.request();

    let reason = svc_res
        .status()
        .canonical_reason()
        .unwrap_or("Unknown error");

    // Provide a fallback to a simple plain text response in case an error occurs during the
    // rendering of the error page.
    let fallback = |err: &str| {
        HttpResponse::build(svc_res.status())
            .content_type(ContentType::plaintext())
            .body(err.to_string())
    };

    let ctx = minijinja::context! {
        status_code => svc_res.status().as_str(),
        reason => reason,
    };

    let rendered = MiniJinjaRenderer::extract(req)
        .into_inner()
        .and_then(|tmpl_env| tmpl_env.render(tmpl, ctx));

    let res = match rendered {
        Ok(body) => body
            .customize()
            .with_status(svc_res.status())
            .respond_to(req)
            .map_into_boxed_body(),
        Err(_) => fallback(reason),
    };

    Ok(ErrorHandlerResponse::Response(ServiceResponse::new(
        svc_res.into_parts().0,
        res.map_into_right_body(),
    )))
}
