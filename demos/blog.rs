//! A tiny blog behind the full pipeline.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example blog
//!
//! Try:
//!   curl -i http://localhost:3000/admin                       # 301 → /login
//!   curl -i -X POST http://localhost:3000/login -d 'user=ada&role=user'
//!   curl -i -b 'tollgate.session_token=<token>' http://localhost:3000/admin   # 301 → /
//!   curl -i -b 'tollgate.session_token=<token>' http://localhost:3000/api/auth/get-session
//!
//! Set `OBSERVABILITY_ENABLED=true` to export spans to a local OTLP collector.

use std::sync::Arc;

use http::header::SET_COOKIE;
use http::{Method, StatusCode};
use tollgate::identity::SESSION_COOKIE;
use tollgate::{
    AuthDelegate, Config, Logger, MemoryProvider, Observability, Request, RequestLog, Response,
    Router, Sequence, Server, SessionExtractor, Tracer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    tollgate::log::init(&config.log_filter)?;
    let logger = Logger::new("[blog]");

    let tracer = Tracer::from_config(&config.tracing)?;
    let provider = Arc::new(MemoryProvider::new());

    let sign_in = {
        let provider = Arc::clone(&provider);
        move |req: Request| {
            let provider = Arc::clone(&provider);
            async move { login_submit(&provider, req) }
        }
    };

    let app = Router::new()
        .on(Method::GET, "/", home)
        .on(Method::GET, "/login", login_page)
        .on(Method::POST, "/login", sign_in)
        .on(Method::GET, "/account", account)
        .on(Method::GET, "/admin", admin)
        .on(Method::GET, "/blog/{slug}", post);

    let timeout = config.auth.provider_timeout;
    let pipeline = Sequence::new()
        .with(Observability::new(tracer.clone()))
        .with(RequestLog::new("[http]"))
        .with(AuthDelegate::new(Arc::clone(&provider), tracer.clone()).with_timeout(timeout))
        .with(SessionExtractor::new(provider, tracer.clone()).with_timeout(timeout))
        .resolve_with(app);

    logger.info(format!("tracing {}", if tracer.is_enabled() { "on" } else { "off" }));
    let served = Server::bind(config.bind_addr).serve(pipeline).await;

    tracer.shutdown().await;
    served?;
    Ok(())
}

async fn home(req: Request) -> Response {
    match req.user() {
        Some(user) => Response::html(format!("<h1>Hello, {}</h1>", user.id)),
        None => Response::html("<h1>Hello, stranger</h1><a href=\"/login\">sign in</a>"),
    }
}

async fn login_page(req: Request) -> Response {
    if req.user().is_some() {
        return Response::redirect(StatusCode::FOUND, "/");
    }
    Response::html(
        "<form method=\"post\"><input name=\"user\"><input name=\"role\"><button>Go</button></form>",
    )
}

fn login_submit(provider: &MemoryProvider, req: Request) -> Response {
    let form = String::from_utf8_lossy(req.body());
    let field = |name: &str| {
        form.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_owned())
    };
    let Some(user) = field("user").filter(|u| !u.is_empty()) else {
        return Response::status(StatusCode::BAD_REQUEST);
    };
    let role = field("role").unwrap_or_else(|| "user".to_owned());

    let (token, _) = provider.create_session(user, role);
    Response::builder()
        .status(StatusCode::FOUND)
        .header("location", "/account")
        .header(SET_COOKIE.as_str(), &format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax"))
        .text(token)
}

async fn account(req: Request) -> Response {
    let Some(user) = req.user() else {
        return Response::redirect(StatusCode::MOVED_PERMANENTLY, "/login");
    };
    Response::html(format!("<h1>{}</h1><p>role: {}</p>", user.id, user.role))
}

async fn admin(req: Request) -> Response {
    match req.user() {
        None => Response::redirect(StatusCode::MOVED_PERMANENTLY, "/login"),
        Some(user) if !user.is_admin() => Response::redirect(StatusCode::MOVED_PERMANENTLY, "/"),
        Some(user) => Response::html(format!("<h1>Admin</h1><p>signed in as {}</p>", user.id)),
    }
}

async fn post(req: Request) -> Response {
    let slug = req.param("slug").unwrap_or_default();
    Response::html(format!("<article><h1>{slug}</h1></article>"))
}
