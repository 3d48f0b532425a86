use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use agora_api::auth::{self, AppState, AppStateInner};
use agora_api::middleware::require_auth;
use agora_api::{comments, dialogs, members, posts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("AGORA_DB_PATH").unwrap_or_else(|_| "agora.db".into());
    let host = std::env::var("AGORA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("AGORA_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = agora_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner { db });

    // Public routes: no auth layer, so a missing or malformed
    // Authorization header simply means an unauthenticated request.
    let public_routes = Router::new()
        .route("/hello", get(auth::hello))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/members/search", get(members::search_members))
        .route("/members/{id}", get(members::get_member))
        .route("/members/{id}/following", get(members::following))
        .route("/members/{id}/followers", get(members::followers))
        .route("/members/{id}/posts", get(posts::member_posts))
        .route("/posts", get(posts::list_posts))
        .route("/posts/{id}", get(posts::get_post))
        .route("/posts/{post_id}/comments", get(comments::list_comments))
        .route("/comments/{id}", get(comments::get_comment))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/members/me", put(members::replace_me).patch(members::update_me))
        .route("/members/{id}/follow", post(members::follow))
        .route("/members/{id}/unfollow", post(members::unfollow))
        .route("/posts", post(posts::create_post))
        .route(
            "/posts/{id}",
            put(posts::update_post)
                .patch(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/posts/{id}/like", post(posts::toggle_like))
        .route("/posts/{post_id}/comments", post(comments::create_comment))
        .route(
            "/comments/{id}",
            put(comments::update_comment)
                .patch(comments::update_comment)
                .delete(comments::delete_comment),
        )
        .route("/comments/{id}/like", post(comments::toggle_like))
        .route("/dialogs", get(dialogs::list_dialogs))
        .route("/dialogs/with/{member_id}", post(dialogs::open_dialog))
        .route(
            "/dialogs/{dialog_id}/messages",
            get(dialogs::list_messages).post(dialogs::send_message),
        )
        .route("/messages/{id}/read", post(dialogs::mark_message_read))
        .route("/dialogs/{dialog_id}/read", post(dialogs::mark_dialog_read))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Agora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
