//! Remote control plane access: boundary traits, HTTP binding, session
//! guard and task poller.

mod http;
mod poller;
mod remote;
mod session;

pub use http::HttpApi;
pub use poller::{TaskPoller, TaskResult};
pub use remote::{
    AuthProvider, Method, RemoteApi, RemoteOutcome, RemoteRequest, SessionToken, TaskHandle,
    TaskStatus,
};
pub use session::SessionGuard;
