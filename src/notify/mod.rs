// Notification boundary
//
// Best-effort (message, title) delivery with no guarantee contract. The
// default sink writes through tracing; a desktop UI can plug in its own.

use tracing::info;

pub const PROG_NAME: &str = "resticmate";

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, title: Option<&str>);
}

/// Log-backed notifier used when no UI is attached.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, title: Option<&str>) {
        let title = match title {
            Some(title) => format!("{PROG_NAME}: {title}"),
            None => PROG_NAME.to_string(),
        };
        info!(title = %title, "{message}");
    }
}
