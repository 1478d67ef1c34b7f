pub mod app;
pub mod session;
pub mod state;

pub use app::{ChatWidget, WidgetSinks};
pub use session::SessionContext;
pub use state::WidgetState;
