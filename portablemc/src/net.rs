//! Shared networking primitives: the lazily-built HTTP client and a helper for
//! driving futures to completion from synchronous code.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::Client;


/// User agent sent with every request, identifying the launcher and its version.
const USER_AGENT: &str = concat!("portablemc/", env!("CARGO_PKG_VERSION"));

/// How long a connection attempt may take before being aborted.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a read may stay idle before the request is aborted.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

static READ_TIMEOUT: OnceCell<Duration> = OnceCell::new();
static CLIENT: OnceCell<Client> = OnceCell::new();

/// Configure the idle read timeout used by all requests of this process, this only
/// has an effect when called before the first request is made.
pub fn set_timeout(timeout: Duration) {
    let _ = READ_TIMEOUT.set(timeout);
}

/// Return a handle to the shared HTTP client, building it on first use. The client
/// keeps its connections alive so each host is reused across requests.
pub(crate) fn client() -> reqwest::Result<Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT.get().copied().unwrap_or(DEFAULT_READ_TIMEOUT))
            .build()
    }).cloned()
}

/// Run the given future to completion on a fresh current-thread runtime. All
/// blocking entry points of the crate funnel through this, so the async machinery
/// stays an implementation detail.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("tokio runtime")
        .block_on(future)
}
