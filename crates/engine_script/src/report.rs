//! Where contained errors go.
//!
//! Nothing raised by a module, a loader, or a clone request is allowed to
//! escape a frame. Everything is handed to an [`ErrorSink`] instead.

use tracing::{error, warn};

use crate::error::ScriptError;

/// Receives every error the script system contains.
pub trait ErrorSink {
    fn report(&mut self, error: ScriptError);
}

impl<F: FnMut(ScriptError)> ErrorSink for F {
    fn report(&mut self, error: ScriptError) {
        self(error);
    }
}

/// Logs reports through `tracing`. Attribute validation problems are
/// warnings; everything else is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&mut self, err: ScriptError) {
        let entity = err.entity();
        if err.is_warning() {
            warn!(%entity, "{err}");
        } else {
            error!(%entity, "{err}");
        }
    }
}
