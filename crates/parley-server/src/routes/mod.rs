// Export route modules
pub mod chat;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new().nest("/chat", chat::routes(state))
}
