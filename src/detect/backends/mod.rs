pub mod motion;
pub mod remote;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionBackend;
pub use remote::RemoteBackend;
pub use scripted::{ScriptStep, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
