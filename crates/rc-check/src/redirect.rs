//! Scoped silencing of the process error stream.
//!
//! Noisy entries write to stderr as part of normal operation. While a
//! [`StderrSilencer`] is alive, file descriptor 2 points at the null device;
//! dropping it puts the original descriptor back and closes the sink.

use std::io::{self, Write};

#[cfg(unix)]
use tracing::error;

use crate::config::Suppression;
use crate::error::RedirectError;

#[cfg(unix)]
pub const NULL_DEVICE: &str = "/dev/null";

pub struct StderrSilencer {
    #[cfg(unix)]
    saved: libc::c_int,
    #[cfg(unix)]
    _sink: std::fs::File,
}

impl StderrSilencer {
    pub fn engage(mode: Suppression) -> Result<Self, RedirectError> {
        match mode {
            Suppression::Off => Err(RedirectError::Unsupported),
            Suppression::Descriptor => Self::redirect(),
        }
    }

    #[cfg(unix)]
    fn redirect() -> Result<Self, RedirectError> {
        use std::os::fd::AsRawFd;

        io::stderr().flush()?;
        let sink = std::fs::OpenOptions::new().write(true).open(NULL_DEVICE)?;

        // SAFETY: dup on a standard descriptor has no memory-safety preconditions.
        let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
        if saved < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: both descriptors are open for the duration of the call.
        if unsafe { libc::dup2(sink.as_raw_fd(), libc::STDERR_FILENO) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: `saved` was returned by dup above and is owned here.
            unsafe { libc::close(saved) };
            return Err(err.into());
        }

        Ok(Self { saved, _sink: sink })
    }

    #[cfg(not(unix))]
    fn redirect() -> Result<Self, RedirectError> {
        Err(RedirectError::Unsupported)
    }
}

impl Drop for StderrSilencer {
    fn drop(&mut self) {
        let _ = io::stderr().flush();
        #[cfg(unix)]
        self.release();
    }
}

#[cfg(unix)]
impl StderrSilencer {
    fn release(&self) {
        if let Err(err) = self.restore() {
            // fd 2 may still be the sink.
            error!(%err, "failed to restore stderr after silencing");
        }
    }

    /// Point fd 2 back at the saved descriptor and release it. The saved
    /// descriptor is closed whether or not the restore succeeded.
    fn restore(&self) -> io::Result<()> {
        // SAFETY: `saved` is the descriptor duplicated in `redirect` and is
        // closed exactly once, from drop.
        let restored = unsafe { libc::dup2(self.saved, libc::STDERR_FILENO) };
        let result = if restored < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        };
        // SAFETY: as above.
        unsafe { libc::close(self.saved) };
        result
    }
}
