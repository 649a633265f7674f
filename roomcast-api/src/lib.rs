// Roomcast API layer
//
// HTTP endpoints around the message backplane: the SSE stream controller,
// room management, the room send endpoint and health/stats endpoints.

pub mod http;

pub use http::{create_router, AppState};
