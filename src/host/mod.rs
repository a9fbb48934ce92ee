//! Host surface the broker runs inside.
//!
//! The host owns the database service's lifecycle, names the application,
//! and receives every response envelope. [`LocalHost`] is the in-process
//! implementation used by the binary and the tests.

pub mod local;
pub mod router;

pub use local::LocalHost;
pub use router::ResponseRouter;

use crate::db::DatabaseService;
use crate::models::ResponseEnvelope;
use std::sync::Arc;
use tokio::sync::watch;

pub trait HostSurface: Send + Sync + 'static {
    type Service: DatabaseService;

    /// The database service, or `None` while it is unbound.
    fn database(&self) -> Option<Arc<Self::Service>>;

    /// Application name passed to every service call.
    fn app_name(&self) -> &str;

    /// Hand a completed envelope to the caller side.
    fn signal_response_available(&self, envelope: ResponseEnvelope);

    /// Service availability; `true` while a service is bound.
    fn availability(&self) -> watch::Receiver<bool>;
}

/// Handle type of a host's database service.
pub type HandleOf<H> = <<H as HostSurface>::Service as DatabaseService>::Handle;
