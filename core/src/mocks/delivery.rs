//! Mock delivery collaborators.

use crate::delivery::{DeliveryError, Notification, Notifier, PayloadRenderer, Renderer, TicketArtifact, TicketFace};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Mock renderer.
///
/// Renders like [`PayloadRenderer`] or fails on demand.
#[derive(Debug, Clone, Default)]
pub struct MockRenderer {
    /// Whether to simulate a render failure.
    pub should_fail: bool,
}

impl MockRenderer {
    /// Create a renderer that succeeds.
    #[must_use]
    pub const fn new() -> Self {
        Self { should_fail: false }
    }

    /// Create a renderer that always fails.
    #[must_use]
    pub const fn failing() -> Self {
        Self { should_fail: true }
    }
}

impl Renderer for MockRenderer {
    fn render(&self, face: &TicketFace) -> Result<TicketArtifact, DeliveryError> {
        if self.should_fail {
            return Err(DeliveryError::Render("simulated render failure".to_string()));
        }
        PayloadRenderer::new().render(face)
    }
}

/// Mock notifier that records what it was asked to send.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    /// Whether to simulate a delivery failure.
    pub should_fail: bool,
}

impl MockNotifier {
    /// Create a notifier that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Notifications accepted so far (for testing).
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notifier for MockNotifier {
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        let result = if self.should_fail {
            Err(DeliveryError::Notify("simulated delivery failure".to_string()))
        } else {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
            Ok(())
        };
        async move { result }
    }
}
