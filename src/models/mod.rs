pub mod account;
pub mod context;
pub mod custom_var;
pub mod event;

pub use account::AccountId;
pub use context::TrackingContext;
pub use custom_var::{CustomVarSegment, CustomVariable, CustomVariables, Scope};
pub use event::Event;
