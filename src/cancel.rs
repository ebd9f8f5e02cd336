use std::ops::Deref;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Provider,
    Location,
    Run,
}

impl Scope {
    /// Repeated interrupts widen the scope: provider, then location, then the run.
    pub(crate) fn for_interrupt(count: usize) -> Self {
        match count {
            0 | 1 => Scope::Provider,
            2 => Scope::Location,
            _ => Scope::Run,
        }
    }
}

/// Cancellation handles for the three nested scopes of a run.
///
/// Each location gets a child of the run token and each provider a child of its
/// location token, so cancelling an outer scope reaches whatever is blocked inside
/// it. The location and provider slots hold the scope currently in flight and are
/// empty between scopes.
#[derive(Debug, Default)]
pub(crate) struct CancelScopes {
    run: CancellationToken,
    location: Mutex<Option<CancellationToken>>,
    provider: Mutex<Option<CancellationToken>>,
}

/// A location or provider scope that is in flight until dropped.
pub(crate) struct ActiveScope<'a> {
    token: CancellationToken,
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Deref for ActiveScope<'_> {
    type Target = CancellationToken;

    fn deref(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

fn cancel_live(slot: &Mutex<Option<CancellationToken>>) -> bool {
    match slot.lock().as_ref() {
        Some(token) if !token.is_cancelled() => {
            token.cancel();
            true
        }
        _ => false,
    }
}

impl CancelScopes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns false if the run was already cancelled.
    pub(crate) fn cancel_run(&self) -> bool {
        let live = !self.run.is_cancelled();
        self.run.cancel();
        live
    }

    /// Abandons the location currently being tested; the run moves on. Returns
    /// false when no location is in flight.
    pub(crate) fn cancel_location(&self) -> bool {
        cancel_live(&self.location)
    }

    /// Abandons the provider currently being measured; the location moves on.
    /// Returns false when no provider is in flight.
    pub(crate) fn cancel_provider(&self) -> bool {
        cancel_live(&self.provider)
    }

    pub(crate) fn cancel(&self, scope: Scope) -> bool {
        match scope {
            Scope::Provider => self.cancel_provider(),
            Scope::Location => self.cancel_location(),
            Scope::Run => self.cancel_run(),
        }
    }

    pub(crate) fn is_run_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }

    pub(crate) fn run_token(&self) -> &CancellationToken {
        &self.run
    }

    pub(crate) fn enter_location(&self) -> ActiveScope<'_> {
        let token = self.run.child_token();
        *self.location.lock() = Some(token.clone());
        ActiveScope {
            token,
            slot: &self.location,
        }
    }

    pub(crate) fn enter_provider(&self, location: &CancellationToken) -> ActiveScope<'_> {
        let token = location.child_token();
        *self.provider.lock() = Some(token.clone());
        ActiveScope {
            token,
            slot: &self.provider,
        }
    }
}
