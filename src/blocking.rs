use crate::errors::Error;

/// Runs a synchronous, possibly blocking closure on a dedicated thread and
/// awaits its result, the same shape an actix-web handler uses to wrap a
/// synchronous database call. `Store`'s reference implementation talks
/// to the local filesystem synchronously;
/// this lets engine handlers await it without stalling the actor's
/// mailbox.
pub async fn run<F, T>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task panicked: {}", e)))?
}
