pub mod dispatch;
pub mod gateway;

pub use dispatch::Dispatcher;
pub use gateway::Gateway;
