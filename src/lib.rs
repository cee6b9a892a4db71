pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::input::{KeyEvent, RouteOutcome};
pub use application::orchestrator::{CreateRequest, OrchestratorDependencies, SessionOrchestrator};
pub use application::sanitize::sanitize;
pub use application::scheduler::{Cadence, FocusEvent, FocusState};
pub use domain::{CaptureSnapshot, Session, SessionId, SessionStatus};
pub use error::SessionError;
