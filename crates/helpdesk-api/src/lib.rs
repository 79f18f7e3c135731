pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod password;
pub mod routes;
pub mod seed;
pub mod tickets;
pub mod tokens;
pub mod users;
mod views;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// Run synchronous store work off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
