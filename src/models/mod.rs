mod session;
mod user;
mod visit;

pub use session::*;
pub use user::*;
pub use visit::*;
