pub mod rule;
pub mod signal_event;
pub mod suggestion;
pub mod trigger;
pub mod user;
pub mod weather;

pub use rule::*;
pub use signal_event::*;
pub use suggestion::*;
pub use trigger::*;
pub use user::*;
pub use weather::*;
