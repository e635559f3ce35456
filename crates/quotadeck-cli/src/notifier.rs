//! Where threshold alerts end up when running from the terminal.
//!
//! Alerts always go to stdout. With the `desktop-notifications` feature they
//! are also shown as native notifications.

use quotadeck_core::notifications::{AlertSink, ThresholdAlert};
#[cfg(feature = "desktop-notifications")]
use quotadeck_core::Severity;

#[derive(Debug, Default)]
pub struct TerminalSink {
    desktop: bool,
}

impl TerminalSink {
    pub fn new(desktop: bool) -> Self {
        if desktop && !cfg!(feature = "desktop-notifications") {
            tracing::warn!("Built without desktop-notifications, alerts go to the terminal only");
        }
        Self { desktop }
    }
}

impl AlertSink for TerminalSink {
    fn show(&self, alert: &ThresholdAlert) {
        println!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title);
        for line in alert.body.lines() {
            println!("    {}", line);
        }

        if self.desktop {
            #[cfg(feature = "desktop-notifications")]
            show_desktop(alert);
        }
    }

    fn navigate_to_overview(&self) {
        // No window to raise; the closest thing is pointing at the status command
        println!("Run `quotadeck status` for the full overview");
    }
}

#[cfg(feature = "desktop-notifications")]
fn show_desktop(alert: &ThresholdAlert) {
    use std::sync::Once;

    static MACOS_APP_INIT: Once = Once::new();
    MACOS_APP_INIT.call_once(|| {
        #[cfg(target_os = "macos")]
        {
            if let Err(e) = notify_rust::set_application("com.apple.Terminal") {
                tracing::warn!("Failed to set notification application: {}", e);
            }
        }
    });

    let mut notification = notify_rust::Notification::new();
    notification
        .summary(&alert.title)
        .body(&alert.body)
        .appname("quotadeck");

    let timeout = match alert.severity {
        Severity::Critical => notify_rust::Timeout::Never,
        _ => notify_rust::Timeout::Milliseconds(8000),
    };
    notification.timeout(timeout);

    // Urgency is only available on Linux (freedesktop notification spec)
    #[cfg(target_os = "linux")]
    notification.urgency(match alert.severity {
        Severity::Critical => notify_rust::Urgency::Critical,
        _ => notify_rust::Urgency::Normal,
    });

    if let Err(e) = notification.show() {
        tracing::warn!("Could not send notification: {}", e);
    }
}
