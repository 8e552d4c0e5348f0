mod builder;
mod collaborator;
mod context;
mod rpc;
mod safe;
mod session;

pub use builder::*;
pub use collaborator::*;
pub use context::*;
pub use rpc::*;
pub use safe::*;
pub use session::*;
