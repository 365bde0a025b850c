//! Local socket naming, binding, and the shared accept loop.
//!
//! Sockets live at a fixed, well-known path derived from a base name:
//! `<temp dir>/<name>.sock` on Unix and `\\.\pipe\<name>` on Windows.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use interprocess::local_socket::tokio::{Listener, Stream};
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions, Name};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::AppError;

/// Well-known socket path for `name`.
#[must_use]
pub fn socket_path(name: &str) -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(format!(r"\\.\pipe\{name}"))
    }

    #[cfg(not(windows))]
    {
        std::env::temp_dir().join(format!("{name}.sock"))
    }
}

/// Convert a socket path into an `interprocess` name.
///
/// # Errors
///
/// Returns the underlying I/O error if the path is not a valid socket name
/// on this platform.
pub fn socket_name(path: &Path) -> io::Result<Name<'static>> {
    path.to_path_buf().to_fs_name::<GenericFilePath>()
}

/// Best-effort removal of a socket file left by a previous instance.
///
/// A missing file is not an error; other failures are logged.
pub fn remove_socket_file(path: &Path) {
    if cfg!(windows) {
        return;
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed socket file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), %err, "failed to remove socket file"),
    }
}

/// Bind a listener at `path`, clearing any stale socket first.
///
/// On Unix the socket file is made connectable by any local user.
///
/// # Errors
///
/// Returns the bind error, for example `AddrInUse` when the path is taken.
pub fn bind(path: &Path) -> io::Result<Listener> {
    remove_socket_file(path);

    let listener = ListenerOptions::new()
        .name(socket_name(path)?)
        .create_tokio()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
            warn!(path = %path.display(), %err, "failed to relax socket permissions");
        }
    }

    Ok(listener)
}

/// Accept connections on `listener` until `ct` fires, handing each one to
/// `on_connection` on its own task.
pub fn spawn_accept_loop<F, Fut>(
    listener: Listener,
    label: &'static str,
    ct: CancellationToken,
    on_connection: F,
) -> JoinHandle<()>
where
    F: Fn(Stream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("listener shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(on_connection(stream));
                            }
                            Err(err) => {
                                let err = AppError::Ipc(format!("accept failed: {err}"));
                                warn!(%err, "listener error");
                            }
                        }
                    }
                }
            }
        }
        .instrument(info_span!("local_socket", adapter = label)),
    )
}
